//! `{placeholder}` rendering for fact-supplied message templates.

use std::collections::BTreeMap;

/// Renders `template`, substituting `{name}` from `values`.
///
/// `{{` and `}}` escape braces. Unknown placeholders and an unterminated
/// `{...}` are kept verbatim: templates come from data, so a typo there must
/// still produce readable text.
pub(crate) fn render(template: &str, values: &BTreeMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' => {
                if matches!(chars.peek(), Some('{')) {
                    let _ = chars.next();
                    out.push('{');
                    continue;
                }

                let mut name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }

                match values.get(name.trim()) {
                    Some(value) if closed => out.push_str(value),
                    _ => {
                        out.push('{');
                        out.push_str(&name);
                        if closed {
                            out.push('}');
                        }
                    }
                }
            }
            '}' => {
                if matches!(chars.peek(), Some('}')) {
                    let _ = chars.next();
                }
                out.push('}');
            }
            other => out.push(other),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values() -> BTreeMap<&'static str, String> {
        let mut map = BTreeMap::new();
        map.insert("required", "900".to_string());
        map.insert("available", "800".to_string());
        map
    }

    #[test]
    fn substitutes_known_placeholders() {
        assert_eq!(
            render("needs {required} mm, has { available } mm", &values()),
            "needs 900 mm, has 800 mm"
        );
    }

    #[test]
    fn keeps_unknown_and_unterminated_placeholders() {
        assert_eq!(render("{missing} and {required", &values()), "{missing} and {required");
    }

    #[test]
    fn escaped_braces_render_literally() {
        assert_eq!(render("{{required}} = {required}", &values()), "{required} = 900");
    }
}
