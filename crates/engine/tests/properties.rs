use configurator_engine::{BlockReason, CandidateStatus, Engine, SizingSource, Verdict};
use configurator_facts::{
    Accessory, Application, CausalRule, FactAccessor, FactBundle, FactSnapshot, FactValue,
    GraphFactAccessor, RequestContext, Severity, SnapshotScope, Stressor,
};
use proptest::prelude::*;

const FACTS: &[u8] = include_bytes!("../../../demos/facts.json");

fn snapshot() -> FactSnapshot {
    GraphFactAccessor::from_bytes(FACTS)
        .and_then(|accessor| accessor.snapshot(&SnapshotScope::Full))
        .expect("demo facts load")
}

/// Demo facts plus a workshop whose oil mist demands grease resistance with
/// no neutralizing rule, and a fryer hood exposing grease, which has one.
fn snapshot_with_shared_demand() -> FactSnapshot {
    let mut facts = FactBundle::from_bytes(FACTS)
        .expect("demo facts parse")
        .validate()
        .facts;
    facts.applications.push(Application {
        id: "workshop".to_string(),
        stressors: vec!["oil_mist".to_string()],
    });
    facts.accessories.push(Accessory {
        id: "fryer_hood".to_string(),
        stressors: vec!["grease".to_string()],
    });
    facts.stressors.push(Stressor {
        id: "oil_mist".to_string(),
        category: "contaminant".to_string(),
        ..Stressor::default()
    });
    facts.causal_rules.push(CausalRule {
        id: "oil-mist-fouls-media".to_string(),
        stressor: "oil_mist".to_string(),
        demanded_trait: "grease_resistance".to_string(),
        severity: Severity::Critical,
        explanation: String::new(),
    });
    FactSnapshot::from_facts(facts)
}

#[derive(Debug, Clone)]
struct Request {
    application: Option<&'static str>,
    environment: Option<&'static str>,
    material: Option<&'static str>,
    product: Option<&'static str>,
    throughput: Option<f64>,
    max_width: Option<f64>,
    lock: Option<(f64, f64)>,
}

impl Request {
    fn context(&self) -> RequestContext {
        let mut ctx = RequestContext::new();
        if let Some(v) = self.application {
            ctx = ctx.with("application", v);
        }
        if let Some(v) = self.environment {
            ctx = ctx.with("environment", v);
        }
        if let Some(v) = self.material {
            ctx = ctx.with("material", v);
        }
        if let Some(v) = self.product {
            ctx = ctx.with("product", v);
        }
        if let Some(v) = self.throughput {
            ctx = ctx.with("throughput", v);
        }
        if let Some(v) = self.max_width {
            ctx = ctx.with("max_width", v);
        }
        if let Some((w, h)) = self.lock {
            ctx = ctx.with("module_width", w).with("module_height", h);
        }
        ctx
    }
}

fn request() -> impl Strategy<Value = Request> {
    (
        prop::option::of(prop::sample::select(vec!["kitchen", "office", "workshop", "bakery"])),
        prop::option::of(prop::sample::select(vec!["hospital", "healthcare", "rooftop"])),
        prop::option::of(prop::sample::select(vec!["galvanized", "aluzinc", "stainless"])),
        prop::option::of(prop::sample::select(vec![
            "grease_filter",
            "carbon_filter",
            "hygiene_cabinet",
            "standard_cabinet",
        ])),
        prop::option::of(100.0..20_000.0f64),
        prop::option::of(300.0..2_000.0f64),
        prop::option::of(prop::sample::select(vec![
            (300.0, 600.0),
            (600.0, 600.0),
            (450.0, 450.0),
        ])),
    )
        .prop_map(
            |(application, environment, material, product, throughput, max_width, lock)| Request {
                application,
                environment,
                material,
                product,
                throughput,
                max_width,
                lock,
            },
        )
}

/// A trait block survives when the same trait is still blocked at least as
/// hard; stressor lists may grow. Other blocks must survive unchanged.
fn still_blocked(block: &BlockReason, later: &[BlockReason]) -> bool {
    match block {
        BlockReason::MissingTrait { missing_trait, .. } => later.iter().any(|b| {
            matches!(b, BlockReason::MissingTrait { missing_trait: t, .. } if t == missing_trait)
        }),
        BlockReason::Neutralization { missing_trait, .. } => later.iter().any(|b| match b {
            BlockReason::MissingTrait { missing_trait: t, .. }
            | BlockReason::Neutralization { missing_trait: t, .. } => t == missing_trait,
            _ => false,
        }),
        other => later.contains(other),
    }
}

fn evaluate(snapshot: &FactSnapshot, ctx: &RequestContext) -> Verdict {
    Engine::default().evaluate(ctx, snapshot)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn identical_inputs_give_byte_identical_verdicts(req in request()) {
        let snapshot = snapshot();
        let ctx = req.context();
        let first = serde_json::to_string(&evaluate(&snapshot, &ctx)).unwrap();
        let second = serde_json::to_string(&evaluate(&snapshot, &ctx)).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn adding_a_stressor_never_lifts_a_block(
        req in request(),
        accessory in prop::sample::select(vec!["rain_hood", "fryer_hood"]),
    ) {
        let snapshot = snapshot_with_shared_demand();
        let ctx = req.context();
        let before = evaluate(&snapshot, &ctx);
        let after = evaluate(&snapshot, &ctx.clone().with("accessories", accessory));

        for candidate in before.candidates() {
            let later = after.candidate(&candidate.candidate).unwrap();
            for block in &candidate.blocks {
                prop_assert!(
                    still_blocked(block, &later.blocks),
                    "{} lost {:?}, now {:?}",
                    candidate.candidate,
                    block,
                    later.blocks
                );
            }
            if candidate.status.is_block() {
                prop_assert!(later.status.precedence() >= candidate.status.precedence());
                prop_assert!(candidate.assembled || !later.assembled);
            }
        }
    }

    #[test]
    fn locked_dimensions_are_never_replaced(req in request(), lock in prop::sample::select(vec![
        (300.0, 600.0),
        (600.0, 600.0),
        (450.0, 450.0),
    ])) {
        let snapshot = snapshot();
        let ctx = Request { lock: Some(lock), ..req }.context();
        let verdict = evaluate(&snapshot, &ctx);
        if let Some(sizing) = verdict.sizing() {
            prop_assert_eq!(sizing.source, SizingSource::Locked);
            prop_assert_eq!((sizing.module.width, sizing.module.height), lock);
        }
    }

    #[test]
    fn assembly_exactly_when_only_neutralization_blocks(req in request()) {
        let snapshot = snapshot();
        let verdict = evaluate(&snapshot, &req.context());

        for candidate in verdict.candidates() {
            let only_neutralization = !candidate.blocks.is_empty()
                && candidate
                    .blocks
                    .iter()
                    .all(|b| matches!(b, BlockReason::Neutralization { .. }));
            prop_assert_eq!(candidate.assembled, only_neutralization);
            if candidate.assembled {
                prop_assert_eq!(candidate.status, CandidateStatus::NeutralizationBlock);
                prop_assert!(verdict.assemblies().iter().any(|p| p.target == candidate.candidate));
            }
        }
        for plan in verdict.assemblies() {
            prop_assert!(plan.stages.len() >= 2);
            let synced = &plan.stages[0].synced;
            prop_assert!(plan.stages.iter().all(|s| &s.synced == synced));
        }
    }

    #[test]
    fn answered_parameters_are_never_asked_again(req in request()) {
        let snapshot = snapshot();
        let ctx = req.context();
        let first = evaluate(&snapshot, &ctx);
        let answered: Vec<String> = first.clarifications().iter().map(|c| c.key.clone()).collect();

        let mut next = ctx;
        for key in &answered {
            next = next.with(key.clone(), FactValue::text("answered"));
        }
        let second = evaluate(&snapshot, &next);
        for request in second.clarifications() {
            prop_assert!(!answered.contains(&request.key), "asked for {} again", request.key);
        }
    }
}
