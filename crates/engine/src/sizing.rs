//! Capacity & sizing: picks a module size and count for the requested
//! throughput and lays the modules out inside the space bounds.

use crate::profile::ContextKeys;
use crate::veto::{Advisory, AdvisorySource};
use configurator_facts::{Candidate, FactValue, ModuleSize, RequestContext, Severity};
use serde::Serialize;

const DIMENSION_EPSILON: f64 = 1e-6;
const CAPACITY_TOLERANCE: f64 = 1e-12;

/// Sizing inputs read from the request.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SizingRequest {
    pub throughput: Option<f64>,
    pub max_width: Option<f64>,
    pub max_height: Option<f64>,
    /// Explicit `(width, height)` module lock.
    pub lock: Option<(f64, f64)>,
}

impl SizingRequest {
    pub fn from_context(ctx: &RequestContext, keys: &ContextKeys) -> Self {
        let positive = |key: &str| ctx.number(key).filter(|n| *n > 0.0);
        let lock = match (positive(&keys.module_width), positive(&keys.module_height)) {
            (Some(w), Some(h)) => Some((w, h)),
            _ => None,
        };
        Self {
            throughput: positive(&keys.throughput),
            max_width: positive(&keys.max_width),
            max_height: positive(&keys.max_height),
            lock,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingSource {
    /// Module dimensions given explicitly by the request.
    Locked,
    /// One module covers the throughput.
    Single,
    /// Several of the largest fitting module.
    Multiple,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModuleDimensions {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SizingArrangement {
    pub candidate: String,
    pub module: ModuleDimensions,
    pub module_count: u32,
    pub horizontal_count: u32,
    pub vertical_count: u32,
    /// Per-unit effective dimensions.
    pub effective_width: f64,
    pub effective_height: f64,
    pub overall_width: f64,
    pub overall_height: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_module_capacity: Option<f64>,
    pub source: SizingSource,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SizingOutcome {
    pub arrangement: Option<SizingArrangement>,
    pub advisories: Vec<Advisory>,
}

/// Sizes `candidate` for `request`.
///
/// Decision order: an explicit module lock, then the smallest single module
/// covering the throughput, then as many of the largest fitting module as
/// needed. Without throughput and without a lock nothing is arranged.
pub fn arrange(candidate: &Candidate, request: &SizingRequest) -> SizingOutcome {
    let mut outcome = SizingOutcome::default();

    if let Some((width, height)) = request.lock {
        let module = match candidate
            .module_sizes
            .iter()
            .find(|m| m.same_nominal(width, height))
        {
            Some(module) => module.clone(),
            None => {
                outcome.advisories.push(advisory(
                    candidate,
                    Severity::Info,
                    format!(
                        "locked module {}x{} is not in the catalogue",
                        FactValue::Number(width),
                        FactValue::Number(height)
                    ),
                ));
                ModuleSize::new(width, height)
            }
        };
        let capacity = module_capacity(candidate, &module);
        let count = match (request.throughput, capacity) {
            (Some(throughput), Some(capacity)) if capacity > 0.0 => {
                modules_needed(throughput, capacity)
            }
            (Some(throughput), _) => {
                outcome.advisories.push(advisory(
                    candidate,
                    Severity::Warning,
                    format!(
                        "cannot size for throughput {}: locked module {}x{} has no capacity data",
                        FactValue::Number(throughput),
                        FactValue::Number(module.width),
                        FactValue::Number(module.height)
                    ),
                ));
                1
            }
            (None, _) => 1,
        };
        outcome.arrangement = Some(layout(
            candidate,
            &module,
            count,
            capacity,
            SizingSource::Locked,
            request,
            &mut outcome.advisories,
        ));
        return outcome;
    }

    let Some(throughput) = request.throughput else {
        return outcome;
    };

    let rated: Vec<(&ModuleSize, f64)> = candidate
        .module_sizes
        .iter()
        .filter_map(|m| module_capacity(candidate, m).map(|c| (m, c)))
        .filter(|(_, c)| *c > 0.0)
        .collect();
    if rated.is_empty() {
        outcome.advisories.push(advisory(
            candidate,
            Severity::Warning,
            "cannot determine sizing: no rated module sizes".to_string(),
        ));
        return outcome;
    }

    let fitting: Vec<(&ModuleSize, f64)> = rated
        .iter()
        .copied()
        .filter(|(m, _)| fits(m, request))
        .collect();

    let single = fitting
        .iter()
        .filter(|(_, c)| covers(*c, throughput))
        .min_by(|(a, _), (b, _)| a.area().total_cmp(&b.area()));
    if let Some((module, capacity)) = single {
        outcome.arrangement = Some(layout(
            candidate,
            module,
            1,
            Some(*capacity),
            SizingSource::Single,
            request,
            &mut outcome.advisories,
        ));
        return outcome;
    }

    let pool = if fitting.is_empty() {
        outcome.advisories.push(advisory(
            candidate,
            Severity::Warning,
            "no module size fits the space bounds".to_string(),
        ));
        &rated
    } else {
        &fitting
    };
    let largest = pool.iter().copied().reduce(|best, next| {
        if next.1 > best.1 + DIMENSION_EPSILON
            || ((next.1 - best.1).abs() <= DIMENSION_EPSILON && next.0.area() < best.0.area())
        {
            next
        } else {
            best
        }
    });
    if let Some((module, capacity)) = largest {
        outcome.arrangement = Some(layout(
            candidate,
            module,
            modules_needed(throughput, capacity),
            Some(capacity),
            SizingSource::Multiple,
            request,
            &mut outcome.advisories,
        ));
    }
    outcome
}

fn module_capacity(candidate: &Candidate, module: &ModuleSize) -> Option<f64> {
    match &candidate.capacity {
        Some(rule) => Some(rule.module_capacity(module)),
        None => module.capacity,
    }
}

fn modules_needed(throughput: f64, capacity: f64) -> u32 {
    if capacity <= 0.0 || throughput <= 0.0 {
        return 1;
    }
    let mut count = (throughput / capacity).ceil().max(1.0);
    // The quotient can land one off either side of an exact multiple.
    if count > 1.0 && covers(capacity * (count - 1.0), throughput) {
        count -= 1.0;
    } else if !covers(capacity * count, throughput) {
        count += 1.0;
    }
    if count < 1.0 {
        1
    } else if count > f64::from(u32::MAX) {
        u32::MAX
    } else {
        count as u32
    }
}

/// True when `capacity` meets `throughput` within relative rounding noise.
fn covers(capacity: f64, throughput: f64) -> bool {
    capacity + throughput.abs() * CAPACITY_TOLERANCE >= throughput
}

fn fits(module: &ModuleSize, request: &SizingRequest) -> bool {
    let width_ok = request
        .max_width
        .map_or(true, |w| module.effective_width() <= w + DIMENSION_EPSILON);
    let height_ok = request
        .max_height
        .map_or(true, |h| module.effective_height() <= h + DIMENSION_EPSILON);
    width_ok && height_ok
}

fn layout(
    candidate: &Candidate,
    module: &ModuleSize,
    count: u32,
    capacity: Option<f64>,
    source: SizingSource,
    request: &SizingRequest,
    advisories: &mut Vec<Advisory>,
) -> SizingArrangement {
    let effective_width = module.effective_width();
    let effective_height = module.effective_height();

    let horizontal_count = match request.max_width {
        Some(max_width) if effective_width > 0.0 => {
            let per_row = (max_width / effective_width + DIMENSION_EPSILON).floor();
            let per_row = if per_row < 1.0 { 1 } else { per_row.min(f64::from(count)) as u32 };
            per_row.clamp(1, count.max(1))
        }
        _ => count.max(1),
    };
    let vertical_count = count.div_ceil(horizontal_count).max(1);

    let overall_width = f64::from(horizontal_count) * effective_width;
    let overall_height = f64::from(vertical_count) * effective_height;
    if let Some(max_height) = request.max_height {
        if overall_height > max_height + DIMENSION_EPSILON {
            advisories.push(advisory(
                candidate,
                Severity::Warning,
                format!(
                    "arrangement of {count} modules is {} high, exceeding the available {}",
                    FactValue::Number(overall_height),
                    FactValue::Number(max_height)
                ),
            ));
        }
    }

    log::debug!(
        "Sized '{}': {count} x {}x{} ({horizontal_count} x {vertical_count}), {source:?}",
        candidate.id,
        module.width,
        module.height
    );

    SizingArrangement {
        candidate: candidate.id.clone(),
        module: ModuleDimensions {
            width: module.width,
            height: module.height,
        },
        module_count: count,
        horizontal_count,
        vertical_count,
        effective_width,
        effective_height,
        overall_width,
        overall_height,
        per_module_capacity: capacity,
        source,
    }
}

fn advisory(candidate: &Candidate, severity: Severity, message: String) -> Advisory {
    Advisory::new(Some(&candidate.id), AdvisorySource::Sizing, severity, message)
}
