//! Reconciliation of one resource: validate, observe, plan, execute.
//!
//! Statements run one after another on the shared connection. The first
//! failure stops the sequence and nothing is rolled back; running
//! reconciliation again re-diffs against whatever state was left and issues
//! only what is still missing.

use std::path::Path;
use std::sync::Arc;

use chdecl_spec::{Identity, Resource};
use chdecl_sql::{SynthOptions, Synthesizer};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::catalog::{self, Catalog, Observed, SystemCatalog};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::plan::{Action, Phase, Plan, Planner};
use crate::traced::{Connection, ConnectionExt};
use crate::validate::{AllowList, Validator, Violations};

/// Statement text reported when cancellation hits a catalog read.
const CATALOG_READ: &str = "<catalog read>";

/// What a reconciliation did.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub identity: Identity,
    pub action: Action,
    /// Executed statements, secrets masked.
    pub executed: Vec<String>,
    /// The resource as the catalog reports it afterwards.
    pub observed: Option<Observed>,
}

/// Drives reconciliation over one connection.
pub struct Reconciler<C: Connection + ?Sized, K: Catalog = SystemCatalog<C>> {
    conn: Arc<C>,
    catalog: K,
    synth: Synthesizer,
    validator: Validator,
}

impl<C: Connection + ?Sized> Reconciler<C> {
    /// A reconciler that reads observed state from the server's system
    /// tables over the same connection.
    pub fn new(conn: Arc<C>, options: SynthOptions) -> Self {
        let catalog = SystemCatalog::new(conn.clone());
        Self::with_catalog(conn, catalog, options)
    }

    pub fn from_config(conn: Arc<C>, config: &Config) -> Self {
        Self::new(conn, config.synth_options()).with_allow_list(config.allow_list())
    }

    /// A reconciler configured from the nearest `.config/chdecl.styx` at or
    /// above `start`, or from the environment.
    pub fn discover(conn: Arc<C>, start: &Path) -> Result<Self> {
        let config = Config::discover(start)?;
        Ok(Self::from_config(conn, &config))
    }
}

impl<C: Connection + ?Sized, K: Catalog> Reconciler<C, K> {
    pub fn with_catalog(conn: Arc<C>, catalog: K, options: SynthOptions) -> Self {
        let validator = Validator::default().with_default_cluster(options.default_cluster.clone());
        Self {
            conn,
            catalog,
            synth: Synthesizer::new(options),
            validator,
        }
    }

    pub fn synthesizer(&self) -> &Synthesizer {
        &self.synth
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Replace the privileges declarations are checked against.
    pub fn with_allow_list(mut self, allow: impl Into<Arc<AllowList>>) -> Self {
        self.validator = self.validator.with_allow_list(allow);
        self
    }

    /// Plan without touching the server.
    pub fn plan(
        &self,
        prior: Option<&Resource>,
        desired: Option<&Resource>,
        observed: Option<&Observed>,
    ) -> Result<Plan> {
        Planner::new(&self.synth).plan(prior, desired, observed)
    }

    /// Read the observed state under the prior identity, or the desired one
    /// on first apply.
    pub async fn observe(
        &self,
        prior: Option<&Resource>,
        desired: Option<&Resource>,
    ) -> Result<Option<Observed>> {
        let Some(target) = prior.or(desired) else {
            return Ok(None);
        };
        catalog::observe(&self.catalog, target, prior)
            .await
            .map_err(|e| Error::Catalog {
                identity: target.identity(),
                message: e.message,
            })
    }

    /// Bring the server in line with `desired`.
    ///
    /// `prior` is the spec applied last time, `None` on first apply. A
    /// `None` desired spec destroys the resource.
    pub async fn reconcile(
        &self,
        prior: Option<&Resource>,
        desired: Option<&Resource>,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let Some(target) = desired.or(prior) else {
            return Err(Error::Validation {
                identity: Identity::new(None, "", ""),
                violations: Violations::single(
                    "resource",
                    "neither a prior nor a desired declaration was given",
                ),
            });
        };
        let identity = target.identity();
        let span = tracing::info_span!(
            "reconcile",
            identity = %identity,
            action = tracing::field::Empty,
        );
        self.run(identity, prior, desired, cancel, span.clone())
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        identity: Identity,
        prior: Option<&Resource>,
        desired: Option<&Resource>,
        cancel: &CancellationToken,
        span: tracing::Span,
    ) -> Result<Outcome> {
        if let Some(desired) = desired {
            self.validator
                .validate(desired)
                .map_err(|violations| Error::Validation {
                    identity: identity.clone(),
                    violations,
                })?;
        }

        let observed = self.observe_until(&identity, prior, desired, cancel).await?;
        let plan = match self.plan(prior, desired, observed.as_ref()) {
            Ok(plan) => plan,
            Err(err @ Error::Conflict { .. }) => {
                tracing::warn!("{err}");
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        span.record("action", plan.action.as_str());

        if plan.is_noop() {
            tracing::info!("{identity}: up to date");
            return Ok(Outcome {
                identity,
                action: plan.action,
                executed: Vec::new(),
                observed,
            });
        }

        tracing::info!(
            statements = plan.statements.len(),
            "{identity}: {}\n{}",
            plan.action,
            plan.summary.trim_end()
        );
        let executed = self.execute(&plan, cancel).await?;

        let observed = match desired {
            Some(desired) => {
                self.observe_until(&identity, Some(desired), Some(desired), cancel)
                    .await?
            }
            None => None,
        };
        Ok(Outcome {
            identity,
            action: plan.action,
            executed,
            observed,
        })
    }

    async fn observe_until(
        &self,
        identity: &Identity,
        prior: Option<&Resource>,
        desired: Option<&Resource>,
        cancel: &CancellationToken,
    ) -> Result<Option<Observed>> {
        let cancelled = || Error::Cancelled {
            identity: identity.clone(),
            phase: Phase::Observe,
            statement: CATALOG_READ.to_string(),
        };
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(cancelled()),
            observed = self.observe(prior, desired) => observed,
        }
    }

    async fn execute(&self, plan: &Plan, cancel: &CancellationToken) -> Result<Vec<String>> {
        let conn = self.conn.traced();
        let mut executed = Vec::with_capacity(plan.statements.len());
        for stmt in &plan.statements {
            let statement = stmt.redacted();
            let cancelled = || Error::Cancelled {
                identity: plan.identity.clone(),
                phase: stmt.phase,
                statement: statement.clone(),
            };
            if cancel.is_cancelled() {
                return Err(cancelled());
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                result = conn.execute_stmt(&stmt.stmt) => result,
            };
            if let Err(e) = result {
                return Err(Error::Execution {
                    identity: plan.identity.clone(),
                    phase: stmt.phase,
                    statement,
                    message: e.message,
                });
            }
            executed.push(statement);
        }
        Ok(executed)
    }
}
