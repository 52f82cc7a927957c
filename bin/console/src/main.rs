use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use campus_cache::{CacheError, CachePolicy, Refresh, ResponseCache};
use campus_core::{ConfigError, GovernorConfig, TransportError};
use campus_observability::init_tracing;
use campus_scheduler::{RequestScheduler, SchedulerError, SubmitOptions};
use thiserror::Error;
use tokio::time::sleep;
use tracing::info;

const CONFIG_ENV: &str = "CAMPUS_CONFIG";

type List = Vec<String>;
type RequestError = SchedulerError<TransportError>;

#[derive(Debug, Error)]
enum ConsoleError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("request failed: {0}")]
    Request(#[from] CacheError<RequestError>),
}

/// Stand-in for the REST backend; every fourth call is rate limited.
#[derive(Debug, Default)]
struct SimulatedBackend {
    calls: AtomicUsize,
}

impl SimulatedBackend {
    async fn list(&self, resource: &str) -> Result<List, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        sleep(Duration::from_millis(80)).await;

        if call % 4 == 1 {
            return Err(TransportError::rate_limited());
        }

        let items: &[&str] = match resource {
            "academic-years" => &["2024/25", "2025/26"],
            "departments" => &["Sciences", "Humanities", "Arts"],
            "subjects" => &["Mathematics", "Physics", "History"],
            "classes" => &["7A", "7B", "8A"],
            "teachers" => &["Ms. Okafor", "Mr. Lindqvist"],
            _ => &["Ada", "Alan", "Grace"],
        };
        Ok(items.iter().map(|item| item.to_string()).collect())
    }
}

/// Application-wide request governance, shared by every page.
#[derive(Debug, Clone)]
struct ConsoleContext {
    scheduler: Arc<RequestScheduler<TransportError>>,
    lists: ResponseCache<List, RequestError>,
    backend: Arc<SimulatedBackend>,
}

impl ConsoleContext {
    fn new(config: &GovernorConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            scheduler: Arc::new(RequestScheduler::new(config.scheduler.clone())?),
            lists: ResponseCache::from_config(&config.cache),
            backend: Arc::new(SimulatedBackend::default()),
        })
    }

    /// Loads a list through the cache; misses go through the scheduler.
    async fn load(
        &self,
        policy: &CachePolicy,
        refresh: Refresh,
        priority: i32,
    ) -> Result<List, ConsoleError> {
        let scheduler = Arc::clone(&self.scheduler);
        let backend = Arc::clone(&self.backend);
        let resource = policy.key;

        let list = self
            .lists
            .fetch_with_policy(policy, refresh, move || {
                scheduler.submit(
                    move || {
                        let backend = Arc::clone(&backend);
                        async move { backend.list(resource).await }
                    },
                    SubmitOptions::new().priority(priority),
                )
            })
            .await?;

        Ok(list)
    }
}

async fn load_config() -> Result<GovernorConfig, ConsoleError> {
    let Ok(path) = std::env::var(CONFIG_ENV) else {
        info!("{CONFIG_ENV} not set, using default settings");
        return Ok(GovernorConfig::default());
    };

    let raw = tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| ConsoleError::Io {
            path: path.clone(),
            source,
        })?;

    info!(path, "loaded governor config");
    Ok(GovernorConfig::from_toml_str(&raw)?)
}

#[tokio::main]
async fn main() -> Result<(), ConsoleError> {
    init_tracing();

    info!("starting console demo");

    let config = load_config().await?;
    let ctx = ConsoleContext::new(&config)?;
    let sweeper = ctx.lists.spawn_sweeper(config.cache.sweep_interval());

    // dashboard widgets ask for overlapping lists at the same time
    let (classes, classes_again, subjects, teachers, years) = tokio::join!(
        ctx.load(&CachePolicy::CLASSES, Refresh::IfStale, 10),
        ctx.load(&CachePolicy::CLASSES, Refresh::IfStale, 10),
        ctx.load(&CachePolicy::SUBJECTS, Refresh::IfStale, 5),
        ctx.load(&CachePolicy::TEACHERS, Refresh::IfStale, 5),
        ctx.load(&CachePolicy::ACADEMIC_YEARS, Refresh::IfStale, 0),
    );
    let classes = classes?;
    let shared = classes == classes_again?;
    let (subjects, teachers, years) = (subjects?, teachers?, years?);
    info!(
        classes = classes.len(),
        shared,
        subjects = subjects.len(),
        teachers = teachers.len(),
        years = years.len(),
        "dashboard loaded"
    );
    info!(status = ?ctx.scheduler.status(), stats = ?ctx.lists.stats(), "after dashboard");

    // a teacher record was edited, so staff lists must be refetched
    ctx.lists.invalidate_policy(&CachePolicy::TEACHERS);
    let teachers = ctx.load(&CachePolicy::TEACHERS, Refresh::IfStale, 10).await?;
    info!(teachers = teachers.len(), "staff list refreshed");

    let departments = ctx.load(&CachePolicy::DEPARTMENTS, Refresh::Force, 0).await?;
    info!(departments = departments.len(), stats = ?ctx.lists.stats(), "reference data ready");

    sweeper.shutdown().await;
    ctx.scheduler.shutdown().await;

    info!(
        backend_calls = ctx.backend.calls.load(Ordering::SeqCst),
        "console demo finished"
    );
    Ok(())
}
