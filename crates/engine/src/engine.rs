use crate::assembly;
use crate::clarification;
use crate::error::Result;
use crate::installation;
use crate::profile::EngineProfile;
use crate::resolver;
use crate::sizing::{self, SizingOutcome, SizingRequest};
use crate::verdict::{self, Verdict, VerdictParts};
use crate::veto;
use configurator_facts::{FactAccessor, FactSnapshot, RequestContext, SnapshotScope};

/// Stateless decision engine. Cheap to share across threads.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    profile: EngineProfile,
}

impl Engine {
    pub fn new(profile: EngineProfile) -> Self {
        Self { profile }
    }

    #[must_use]
    pub const fn profile(&self) -> &EngineProfile {
        &self.profile
    }

    /// Snapshot scope covering what `ctx` can touch.
    #[must_use]
    pub fn scope_for(&self, ctx: &RequestContext) -> SnapshotScope {
        let keys = self.profile.keys();
        SnapshotScope::Request {
            application: ctx.text(&keys.application),
            environment: ctx.text(&keys.environment),
            accessories: ctx.members(&keys.accessories),
            max_environment_depth: self.profile.max_environment_depth(),
        }
    }

    /// Fetches a snapshot through `accessor`, then evaluates.
    ///
    /// The scope is derived from the raw context; a second fetch happens only
    /// when a parameter alias names a different application, environment or
    /// accessory set.
    pub fn evaluate_with(&self, accessor: &dyn FactAccessor, ctx: &RequestContext) -> Result<Verdict> {
        let scope = self.scope_for(ctx);
        let snapshot = accessor.snapshot(&scope)?;
        let canonical = ctx.with_aliases(snapshot.parameters());
        let canonical_scope = self.scope_for(&canonical);
        if canonical_scope == scope {
            return Ok(self.evaluate(&canonical, &snapshot));
        }
        log::debug!("Parameter aliases widen the snapshot scope, fetching again");
        let snapshot = accessor.snapshot(&canonical_scope)?;
        Ok(self.evaluate(&canonical, &snapshot))
    }

    /// Runs the pipeline. Pure: identical inputs give identical verdicts.
    ///
    /// Declared parameter aliases are resolved onto their canonical keys
    /// before any stage reads the context.
    pub fn evaluate(&self, ctx: &RequestContext, snapshot: &FactSnapshot) -> Verdict {
        let profile = &self.profile;
        let ctx = &ctx.with_aliases(snapshot.parameters());

        let resolution = resolver::resolve(ctx, snapshot, profile);
        log::debug!(
            "Resolver: {} stressor(s), lineage {:?}",
            resolution.stressors.len(),
            resolution.environment_lineage
        );

        let mut candidates = veto::evaluate(ctx, snapshot, &resolution, profile);
        installation::evaluate(ctx, snapshot, &resolution, profile, &mut candidates);
        let assemblies = assembly::build(ctx, snapshot, profile, &mut candidates);
        log::debug!(
            "Veto: {} candidate(s), {} assembly plan(s)",
            candidates.len(),
            assemblies.len()
        );

        let recommendation = verdict::recommend(&candidates, &assemblies);
        let SizingOutcome {
            arrangement,
            advisories: sizing_advisories,
        } = recommendation
            .as_ref()
            .and_then(|r| snapshot.candidate(&r.candidate))
            .map(|target| {
                sizing::arrange(target, &SizingRequest::from_context(ctx, profile.keys()))
            })
            .unwrap_or_default();

        let focus = verdict::focus(recommendation.as_ref(), &candidates);
        let gate = clarification::gate(ctx, snapshot, profile, &focus, &candidates);
        let alternatives =
            verdict::alternatives(&candidates, snapshot, &resolution, profile.max_alternatives());

        log::info!(
            "Evaluated {} candidate(s): recommendation {}, {} clarification(s), {} alternative(s)",
            candidates.len(),
            recommendation
                .as_ref()
                .map_or("none", |r| r.candidate.as_str()),
            gate.requests.len(),
            alternatives.len()
        );

        Verdict::assemble(
            VerdictParts {
                candidates,
                recommendation,
                assemblies,
                sizing: arrangement,
                sizing_advisories,
                clarifications: gate.requests,
                alternatives,
                resolved_defaults: gate.resolved_defaults,
            },
            ctx,
            snapshot,
            resolution,
        )
    }
}
