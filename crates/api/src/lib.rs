//! Peerage public API: the three declared resources and their lifecycle hooks.
//!
//! An orchestration engine (the `peeragectl` driver, or anything else) calls
//! create/read/update/delete at arbitrary times and keeps the returned state.
//! Every call runs under the configured deadline, and every failure names the
//! resource type and target key.

#![forbid(unsafe_code)]

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use peerage_core::PeerageError;
use peerage_kubehub::Stores;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{info, warn};

pub mod generate;
pub mod offload;
pub mod peering;
pub mod settings;

pub use generate::{GenerateInput, GenerateResource, GenerateState};
pub use offload::{OffloadInput, OffloadResource};
pub use peering::{PeeringInput, PeeringResource};
pub use settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Generate,
    Peering,
    Offload,
}

impl ResourceType {
    pub const ALL: [ResourceType; 3] = [ResourceType::Generate, ResourceType::Peering, ResourceType::Offload];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Generate => "generate",
            ResourceType::Peering => "peering",
            ResourceType::Offload => "offload",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for ResourceType {
    type Err = PeerageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceType::ALL
            .into_iter()
            .find(|r| r.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| PeerageError::invalid(format!("unknown resource {:?} (expect generate, peering or offload)", s)))
    }
}

/// A failed lifecycle call: which resource, which object, and why.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("{resource} {key}: {source}")]
pub struct ApiError {
    pub resource: ResourceType,
    pub key: String,
    pub source: PeerageError,
}

impl ApiError {
    pub fn code(&self) -> &'static str { self.source.code() }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Lifecycle of one declared resource.
///
/// `read`, `update` and `delete` receive the state returned by the previous call.
#[async_trait]
pub trait DeclaredResource: Send + Sync {
    type Input: DeserializeOwned + Send + Sync + 'static;
    type State: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    const TYPE: ResourceType;

    /// Key identifying the target of `input`, used in errors and as the state id.
    fn input_key(input: &Self::Input) -> String;

    fn state_key(state: &Self::State) -> String;

    async fn create(&self, input: Self::Input) -> Result<Self::State, PeerageError>;

    async fn read(&self, prior: Self::State) -> Result<Self::State, PeerageError>;

    async fn update(&self, prior: Self::State, input: Self::Input) -> Result<Self::State, PeerageError>;

    async fn delete(&self, prior: Self::State) -> Result<(), PeerageError>;
}

/// Runs lifecycle calls under a deadline with uniform logging, metrics and error wrapping.
#[derive(Debug, Clone, Copy)]
pub struct Runner {
    deadline: Option<Duration>,
}

impl Runner {
    pub fn new(deadline: Option<Duration>) -> Self { Self { deadline } }

    pub async fn run<T, F>(&self, resource: ResourceType, op: &'static str, key: &str, fut: F) -> ApiResult<T>
    where
        F: Future<Output = Result<T, PeerageError>>,
    {
        let t0 = Instant::now();
        info!(resource = %resource, op, key = %key, "api: {} start", op);
        let res = match self.deadline {
            // Dropping the future on expiry cancels any in-flight store call.
            Some(d) => match tokio::time::timeout(d, fut).await {
                Ok(r) => r,
                Err(_) => Err(PeerageError::unavailable(format!("deadline of {}s exceeded", d.as_secs_f64()))),
            },
            None => fut.await,
        };
        let result = match &res {
            Ok(_) => "ok",
            Err(e) => e.code(),
        };
        counter!("peerage_api_calls_total", 1, "resource" => resource.as_str(), "op" => op, "result" => result);
        histogram!("peerage_api_call_ms", t0.elapsed().as_secs_f64() * 1000.0, "resource" => resource.as_str(), "op" => op);
        match res {
            Ok(v) => {
                info!(resource = %resource, op, key = %key, took_ms = %t0.elapsed().as_millis(), "api: {} ok", op);
                Ok(v)
            }
            Err(source) => {
                warn!(resource = %resource, op, key = %key, error = %source, took_ms = %t0.elapsed().as_millis(), "api: {} failed", op);
                Err(ApiError { resource, key: key.to_string(), source })
            }
        }
    }
}

/// Stored form of a declared resource, as kept by the orchestration engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub resource: ResourceType,
    pub id: String,
    pub state: serde_json::Value,
}

fn decode<T: DeserializeOwned>(resource: ResourceType, key: &str, what: &str, v: serde_json::Value) -> ApiResult<T> {
    serde_json::from_value(v).map_err(|e| ApiError {
        resource,
        key: key.to_string(),
        source: PeerageError::invalid(format!("malformed {}: {}", what, e)),
    })
}

fn encode<S: Serialize>(resource: ResourceType, key: &str, state: &S) -> ApiResult<serde_json::Value> {
    serde_json::to_value(state).map_err(|e| ApiError {
        resource,
        key: key.to_string(),
        source: PeerageError::invalid(format!("unencodable state: {}", e)),
    })
}

fn input_key_of(resource: ResourceType, input: &serde_json::Value) -> String {
    let field = match resource {
        ResourceType::Generate | ResourceType::Offload => "namespace",
        ResourceType::Peering => "remoteClusterName",
    };
    input.get(field).and_then(|v| v.as_str()).unwrap_or("-").to_string()
}

async fn create_json<R: DeclaredResource>(r: &R, runner: Runner, input: serde_json::Value) -> ApiResult<Record> {
    let raw_key = input_key_of(R::TYPE, &input);
    let input: R::Input = decode(R::TYPE, &raw_key, "input", input)?;
    let key = R::input_key(&input);
    let state = runner.run(R::TYPE, "create", &key, r.create(input)).await?;
    Ok(Record { resource: R::TYPE, id: R::state_key(&state), state: encode(R::TYPE, &key, &state)? })
}

async fn read_json<R: DeclaredResource>(r: &R, runner: Runner, prior: &Record) -> ApiResult<Record> {
    let state: R::State = decode(R::TYPE, &prior.id, "stored state", prior.state.clone())?;
    let state = runner.run(R::TYPE, "read", &prior.id, r.read(state)).await?;
    Ok(Record { resource: R::TYPE, id: R::state_key(&state), state: encode(R::TYPE, &prior.id, &state)? })
}

async fn update_json<R: DeclaredResource>(r: &R, runner: Runner, prior: &Record, input: serde_json::Value) -> ApiResult<Record> {
    let state: R::State = decode(R::TYPE, &prior.id, "stored state", prior.state.clone())?;
    let input: R::Input = decode(R::TYPE, &prior.id, "input", input)?;
    let state = runner.run(R::TYPE, "update", &prior.id, r.update(state, input)).await?;
    Ok(Record { resource: R::TYPE, id: R::state_key(&state), state: encode(R::TYPE, &prior.id, &state)? })
}

async fn delete_json<R: DeclaredResource>(r: &R, runner: Runner, prior: &Record) -> ApiResult<()> {
    let state: R::State = decode(R::TYPE, &prior.id, "stored state", prior.state.clone())?;
    runner.run(R::TYPE, "delete", &prior.id, r.delete(state)).await
}

/// JSON-level surface an orchestration engine drives.
#[async_trait]
pub trait PeerageApi: Send + Sync {
    async fn create(&self, resource: ResourceType, input: serde_json::Value) -> ApiResult<Record>;

    async fn read(&self, prior: &Record) -> ApiResult<Record>;

    async fn update(&self, prior: &Record, input: serde_json::Value) -> ApiResult<Record>;

    async fn delete(&self, prior: &Record) -> ApiResult<()>;
}

/// In-process implementation over a set of stores.
pub struct InProcApi {
    generate: GenerateResource,
    peering: PeeringResource,
    offload: OffloadResource,
    runner: Runner,
}

impl InProcApi {
    pub fn new(stores: Stores, settings: &Settings) -> Self {
        Self {
            generate: GenerateResource::new(stores.clone()),
            peering: PeeringResource::new(stores.clone(), settings),
            offload: OffloadResource::new(stores, settings),
            runner: Runner::new(settings.call_timeout),
        }
    }
}

#[async_trait]
impl PeerageApi for InProcApi {
    async fn create(&self, resource: ResourceType, input: serde_json::Value) -> ApiResult<Record> {
        match resource {
            ResourceType::Generate => create_json(&self.generate, self.runner, input).await,
            ResourceType::Peering => create_json(&self.peering, self.runner, input).await,
            ResourceType::Offload => create_json(&self.offload, self.runner, input).await,
        }
    }

    async fn read(&self, prior: &Record) -> ApiResult<Record> {
        match prior.resource {
            ResourceType::Generate => read_json(&self.generate, self.runner, prior).await,
            ResourceType::Peering => read_json(&self.peering, self.runner, prior).await,
            ResourceType::Offload => read_json(&self.offload, self.runner, prior).await,
        }
    }

    async fn update(&self, prior: &Record, input: serde_json::Value) -> ApiResult<Record> {
        match prior.resource {
            ResourceType::Generate => update_json(&self.generate, self.runner, prior, input).await,
            ResourceType::Peering => update_json(&self.peering, self.runner, prior, input).await,
            ResourceType::Offload => update_json(&self.offload, self.runner, prior, input).await,
        }
    }

    async fn delete(&self, prior: &Record) -> ApiResult<()> {
        match prior.resource {
            ResourceType::Generate => delete_json(&self.generate, self.runner, prior).await,
            ResourceType::Peering => delete_json(&self.peering, self.runner, prior).await,
            ResourceType::Offload => delete_json(&self.offload, self.runner, prior).await,
        }
    }
}

pub(crate) fn default_namespace() -> String { peerage_core::consts::DEFAULT_NAMESPACE.to_string() }
