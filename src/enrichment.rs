/// Photo enrichment workflow for identity records
///
/// Each request moves one record through:
/// 1. Guard: skip if the record is already generating or has a photo
/// 2. Mark `InProgress` and build the prompt
/// 3. Call the image service under one cancellation token (timeout + user cancel)
/// 4. Write exactly one terminal state back by record identity
use crate::image_client::ImageService;
use crate::models::{FailureReason, GenerationState, IdentityRecord, PhotoUri, RecordId};
use crate::store::RecordStore;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// How many generations may run at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationPolicy {
    /// One in-flight request per record; different records run concurrently.
    #[default]
    PerRecord,
    /// At most one in-flight request across the whole store.
    SingleFlight,
}

/// What a generation request ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// A photo was generated and stored.
    Completed(PhotoUri),
    /// The attempt failed; the record is now `Failed` and retry-eligible.
    Failed(FailureReason),
    /// Nothing was sent: the record was already generating or completed.
    Skipped(GenerationState),
    /// Nothing was sent: another record is generating under `SingleFlight`.
    Busy,
    /// The id does not resolve in the current store.
    UnknownRecord,
    /// The store was reloaded while the request was in flight; result dropped.
    Discarded,
}

impl GenerationOutcome {
    /// Human-readable summary for callers.
    pub fn message(&self) -> String {
        match self {
            GenerationOutcome::Completed(_) => "Photo generated.".to_string(),
            GenerationOutcome::Failed(FailureReason::Timeout) => {
                FailureReason::Timeout.to_string()
            }
            GenerationOutcome::Failed(reason) => format!("Failed to generate photo: {}", reason),
            GenerationOutcome::Skipped(GenerationState::Completed { .. }) => {
                "Photo already generated.".to_string()
            }
            GenerationOutcome::Skipped(_) => "Photo generation already in progress.".to_string(),
            GenerationOutcome::Busy => "Another photo is being generated.".to_string(),
            GenerationOutcome::UnknownRecord => "Record not found.".to_string(),
            GenerationOutcome::Discarded => {
                "Records were reloaded before the photo arrived.".to_string()
            }
        }
    }
}

type InFlight = HashMap<RecordId, CancellationToken>;

/// A request that has passed the guard and marked its record `InProgress`.
///
/// Must be handed to [`EnrichmentOrchestrator::run`] or
/// [`EnrichmentOrchestrator::spawn`]. Dropping it before the terminal state is
/// written (unused, or with a `run` future that was dropped midway) fails the
/// record with `Cancelled` and releases its in-flight slot.
#[must_use = "the record is cancelled when the pending generation is dropped unrun"]
pub struct PendingGeneration {
    id: RecordId,
    prompt: String,
    token: CancellationToken,
    store: Arc<Mutex<RecordStore>>,
    in_flight: Arc<Mutex<InFlight>>,
    settled: bool,
}

impl fmt::Debug for PendingGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingGeneration")
            .field("id", &self.id)
            .field("settled", &self.settled)
            .finish_non_exhaustive()
    }
}

impl Drop for PendingGeneration {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.token.cancel();
        tracing::warn!(
            "Generation for record {} abandoned before completion",
            self.id.index
        );

        // Fast path when nothing else holds the locks
        if let (Ok(mut store), Ok(mut in_flight)) =
            (self.store.try_lock(), self.in_flight.try_lock())
        {
            release_abandoned(&mut store, &mut in_flight, self.id);
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let id = self.id;
        let (store, in_flight) = (self.store.clone(), self.in_flight.clone());
        runtime.spawn(async move {
            let mut store = store.lock().await;
            let mut in_flight = in_flight.lock().await;
            release_abandoned(&mut store, &mut in_flight, id);
        });
    }
}

/// Fails an abandoned record and frees its slot.
///
/// The record stays `InProgress` until this runs, so no newer request for the
/// same id can hold the slot.
fn release_abandoned(store: &mut RecordStore, in_flight: &mut InFlight, id: RecordId) {
    in_flight.remove(&id);
    store.update_at(id, |record| record.fail_generation(FailureReason::Cancelled));
}

/// Builds the generation prompt from a record's age, gender and nationality.
pub fn build_prompt(record: &IdentityRecord) -> String {
    let data = record.data();
    format!(
        "Professional passport photograph of a {}-year-old {} person of {} descent. \
         Neutral facial expression, looking directly at the camera. \
         Plain, solid light-grey background. Centered, head and shoulders view. \
         High detail, photorealistic. No smiling, no glasses, no hats, no accessories.",
        data.age, data.gender, data.nationality
    )
}

/// Drives photo generation for records in a shared store.
#[derive(Clone)]
pub struct EnrichmentOrchestrator {
    store: Arc<Mutex<RecordStore>>,
    service: Arc<dyn ImageService>,
    timeout: Duration,
    policy: GenerationPolicy,
    in_flight: Arc<Mutex<InFlight>>,
}

impl EnrichmentOrchestrator {
    pub fn new(store: Arc<Mutex<RecordStore>>, service: Arc<dyn ImageService>) -> Self {
        Self {
            store,
            service,
            timeout: DEFAULT_GENERATION_TIMEOUT,
            policy: GenerationPolicy::default(),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_policy(mut self, policy: GenerationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &Arc<Mutex<RecordStore>> {
        &self.store
    }

    /// Generates a photo for one record and waits for the terminal outcome.
    ///
    /// Never fails: every problem ends up in the record's state and in the
    /// returned outcome.
    pub async fn request_generation(&self, id: RecordId) -> GenerationOutcome {
        match self.begin(id).await {
            Ok(pending) => self.run(pending).await,
            Err(outcome) => outcome,
        }
    }

    /// Applies the guard and marks the record `InProgress`.
    ///
    /// `Err` carries the outcome of a request that was not started
    /// (`Skipped`, `Busy` or `UnknownRecord`).
    pub async fn begin(&self, id: RecordId) -> Result<PendingGeneration, GenerationOutcome> {
        let mut store = self.store.lock().await;

        let Some(record) = store.get(id) else {
            tracing::warn!("Generation requested for unknown record {:?}", id);
            return Err(GenerationOutcome::UnknownRecord);
        };

        if !record.generation_state().accepts_request() {
            tracing::debug!(
                "Skipping generation for record {}: state is {}",
                id.index,
                record.generation_state().label()
            );
            return Err(GenerationOutcome::Skipped(record.generation_state().clone()));
        }
        let prompt = build_prompt(record);

        let mut in_flight = self.in_flight.lock().await;
        // In-flight requests from a previous load still count
        if self.policy == GenerationPolicy::SingleFlight && !in_flight.is_empty() {
            tracing::info!("Generation for record {} refused: another one is running", id.index);
            return Err(GenerationOutcome::Busy);
        }

        // No await from here on: the slot, the state and the guard appear together
        let token = CancellationToken::new();
        in_flight.insert(id, token.clone());
        store.update_at(id, IdentityRecord::begin_generation);

        tracing::info!("Photo generation started for record {}", id.index);
        Ok(PendingGeneration {
            id,
            prompt,
            token,
            store: self.store.clone(),
            in_flight: self.in_flight.clone(),
            settled: false,
        })
    }

    /// Performs the service call for a started request and records the result.
    ///
    /// If this future is dropped before it finishes, the record is failed with
    /// `Cancelled` instead of staying `InProgress`.
    pub async fn run(&self, mut pending: PendingGeneration) -> GenerationOutcome {
        let id = pending.id;
        let token = pending.token.clone();

        // One select decides the outcome, so timeout, cancellation and
        // completion are mutually exclusive.
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(FailureReason::Cancelled),
            _ = tokio::time::sleep(self.timeout) => Err(FailureReason::Timeout),
            result = self.service.generate(&pending.prompt, &token) => result,
        };

        // Leaving the in-flight set closes the window for `cancel`. A cancel
        // that landed before this point wins over whatever the select decided.
        let result = {
            let mut in_flight = self.in_flight.lock().await;
            in_flight.remove(&id);
            if token.is_cancelled() {
                Err(FailureReason::Cancelled)
            } else {
                result
            }
        };
        // Aborts whatever is still attached to this request's scope
        token.cancel();

        let result = result.and_then(|image| {
            PhotoUri::from_base64_png(&image.bytes_base64).map_err(|e| {
                tracing::warn!("Discarding image payload for record {}: {}", id.index, e);
                FailureReason::UnknownResponse
            })
        });

        let mut store = self.store.lock().await;
        let applied = match &result {
            Ok(photo) => store.update_at(id, |record| record.complete_generation(photo.clone())),
            Err(reason) => store.update_at(id, |record| record.fail_generation(reason.clone())),
        };
        pending.settled = true;
        drop(store);

        if applied != Some(true) {
            tracing::warn!(
                "Generation result for record {} dropped: store was reloaded",
                id.index
            );
            return GenerationOutcome::Discarded;
        }

        match result {
            Ok(photo) => {
                tracing::info!("✓ Photo generated for record {}", id.index);
                GenerationOutcome::Completed(photo)
            }
            Err(reason) => {
                tracing::error!("Photo generation failed for record {}: {}", id.index, reason);
                GenerationOutcome::Failed(reason)
            }
        }
    }

    /// Runs a started request on a background task.
    pub fn spawn(&self, pending: PendingGeneration) -> JoinHandle<GenerationOutcome> {
        let orchestrator = self.clone();
        tokio::spawn(async move { orchestrator.run(pending).await })
    }

    /// Cancels the in-flight request for `id`, if any.
    ///
    /// The record becomes `Failed(Cancelled)` once the running request observes
    /// the cancellation.
    pub async fn cancel(&self, id: RecordId) -> bool {
        match self.in_flight.lock().await.get(&id) {
            Some(token) => {
                tracing::info!("Cancelling photo generation for record {}", id.index);
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of requests currently in flight.
    pub async fn in_flight(&self) -> usize {
        self.in_flight.lock().await.len()
    }
}
