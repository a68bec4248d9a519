//! Mock media engine for signaling tests.
//!
//! Provides a `MediaEngine` that can be configured to:
//! - Fail transport creation, produce or consume
//! - Refuse every consume compatibility check
//! - Hold `produce` open for a while, to race it against a disconnect
//! - Count every call so tests can assert what was never attempted
//!
//! # Example
//!
//! ```rust,ignore
//! use sfu_test_utils::MockEngine;
//!
//! let engine = MockEngine::builder().fail_produce().build();
//! // ... drive the hub ...
//! assert_eq!(engine.consume_calls(), 0);
//! ```

use async_trait::async_trait;
use common::types::{ConsumerId, ProducerId, RouterId, TransportId};
use sfu_service::engine::{
    ConsumeOptions, Consumer, DtlsFingerprint, DtlsParameters, DtlsRole, EngineError,
    IceCandidate, IceParameters, MediaEngine, MediaHandle, MediaKind, Producer,
    RtpCapabilities, RtpCodecCapability, RtpParameters, Router, Transport, TransportProtocol,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct MockState {
    routers: HashSet<RouterId>,
    transports: HashSet<TransportId>,
    producers: HashMap<ProducerId, (TransportId, MediaKind)>,
    consumers: HashSet<ConsumerId>,
    closed: Vec<MediaHandle>,
}

/// Mock media engine for testing the signaling coordinator.
#[derive(Debug, Default)]
pub struct MockEngine {
    fail_create_transport: bool,
    fail_produce: bool,
    fail_consume: bool,
    reject_consume: bool,
    produce_delay: Option<Duration>,
    state: Mutex<MockState>,
    create_transport_calls: AtomicU64,
    produce_calls: AtomicU64,
    can_consume_calls: AtomicU64,
    consume_calls: AtomicU64,
}

impl MockEngine {
    /// Create a new MockEngine builder.
    #[must_use]
    pub fn builder() -> MockEngineBuilder {
        MockEngineBuilder::default()
    }

    /// A mock that succeeds at everything.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::builder().build()
    }

    #[must_use]
    pub fn create_transport_calls(&self) -> u64 {
        self.create_transport_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn produce_calls(&self) -> u64 {
        self.produce_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn can_consume_calls(&self) -> u64 {
        self.can_consume_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn consume_calls(&self) -> u64 {
        self.consume_calls.load(Ordering::SeqCst)
    }

    /// Handles passed to `close`, in call order.
    #[must_use]
    pub fn closed(&self) -> Vec<MediaHandle> {
        self.state.lock().unwrap().closed.clone()
    }

    #[must_use]
    pub fn live_transports(&self) -> usize {
        self.state.lock().unwrap().transports.len()
    }

    #[must_use]
    pub fn live_producers(&self) -> usize {
        self.state.lock().unwrap().producers.len()
    }

    #[must_use]
    pub fn live_consumers(&self) -> usize {
        self.state.lock().unwrap().consumers.len()
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    async fn create_router(
        &self,
        media_codecs: Vec<RtpCodecCapability>,
    ) -> Result<Router, EngineError> {
        let codecs = media_codecs
            .into_iter()
            .zip(100u8..)
            .map(|(codec, payload_type)| RtpCodecCapability {
                preferred_payload_type: Some(payload_type),
                ..codec
            })
            .collect();

        let router = Router {
            id: RouterId::new(),
            rtp_capabilities: RtpCapabilities {
                codecs,
                header_extensions: vec![],
            },
        };
        self.state.lock().unwrap().routers.insert(router.id);
        Ok(router)
    }

    async fn create_transport(&self, router: RouterId) -> Result<Transport, EngineError> {
        self.create_transport_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_create_transport {
            return Err(EngineError::Io("mock transport failure".to_string()));
        }

        let mut state = self.state.lock().unwrap();
        if !state.routers.contains(&router) {
            return Err(EngineError::UnknownRouter(router));
        }

        let transport = Transport {
            id: TransportId::new(),
            ice_parameters: IceParameters {
                username_fragment: "mockufrag".to_string(),
                password: "mockpassword".to_string(),
                ice_lite: true,
            },
            ice_candidates: vec![IceCandidate {
                foundation: "udpcandidate".to_string(),
                priority: 1_076_302_079,
                ip: "127.0.0.1".to_string(),
                port: 40000,
                protocol: TransportProtocol::Udp,
                candidate_type: "host".to_string(),
            }],
            dtls_parameters: DtlsParameters {
                role: DtlsRole::Auto,
                fingerprints: vec![DtlsFingerprint {
                    algorithm: "sha-256".to_string(),
                    value: "00:11:22:33".to_string(),
                }],
            },
        };
        state.transports.insert(transport.id);
        Ok(transport)
    }

    async fn can_consume(
        &self,
        _router: RouterId,
        producer: ProducerId,
        _rtp_capabilities: &RtpCapabilities,
    ) -> bool {
        self.can_consume_calls.fetch_add(1, Ordering::SeqCst);
        !self.reject_consume && self.state.lock().unwrap().producers.contains_key(&producer)
    }

    async fn produce(
        &self,
        transport: TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<Producer, EngineError> {
        self.produce_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_produce {
            return Err(EngineError::UnsupportedCodec("mock produce failure".to_string()));
        }
        if let Some(delay) = self.produce_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if !state.transports.contains(&transport) {
            return Err(EngineError::UnknownTransport(transport));
        }

        let producer = Producer {
            id: ProducerId::new(),
            kind,
            rtp_parameters,
        };
        state.producers.insert(producer.id, (transport, kind));
        Ok(producer)
    }

    async fn consume(
        &self,
        transport: TransportId,
        producer: ProducerId,
        _rtp_capabilities: &RtpCapabilities,
        options: ConsumeOptions,
    ) -> Result<Consumer, EngineError> {
        self.consume_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_consume {
            return Err(EngineError::Incompatible);
        }

        let mut state = self.state.lock().unwrap();
        if !state.transports.contains(&transport) {
            return Err(EngineError::UnknownTransport(transport));
        }
        let Some((_, kind)) = state.producers.get(&producer).copied() else {
            return Err(EngineError::UnknownProducer(producer));
        };

        let consumer = Consumer {
            id: ConsumerId::new(),
            producer_id: producer,
            kind,
            rtp_parameters: RtpParameters::default(),
            paused: options.paused,
        };
        state.consumers.insert(consumer.id);
        Ok(consumer)
    }

    async fn close(&self, handle: MediaHandle) {
        let mut state = self.state.lock().unwrap();
        match handle {
            MediaHandle::Transport(id) => {
                state.transports.remove(&id);
                state.producers.retain(|_, (transport, _)| *transport != id);
            }
            MediaHandle::Producer(id) => {
                state.producers.remove(&id);
            }
            MediaHandle::Consumer(id) => {
                state.consumers.remove(&id);
            }
        }
        state.closed.push(handle);
    }
}

/// Builder for MockEngine.
#[derive(Debug, Default)]
pub struct MockEngineBuilder {
    fail_create_transport: bool,
    fail_produce: bool,
    fail_consume: bool,
    reject_consume: bool,
    produce_delay: Option<Duration>,
}

impl MockEngineBuilder {
    /// Every `create_transport` call fails.
    #[must_use]
    pub fn fail_create_transport(mut self) -> Self {
        self.fail_create_transport = true;
        self
    }

    /// Every `produce` call fails.
    #[must_use]
    pub fn fail_produce(mut self) -> Self {
        self.fail_produce = true;
        self
    }

    /// Every `consume` call fails after the compatibility check passed.
    #[must_use]
    pub fn fail_consume(mut self) -> Self {
        self.fail_consume = true;
        self
    }

    /// `can_consume` always answers `false`.
    #[must_use]
    pub fn reject_consume(mut self) -> Self {
        self.reject_consume = true;
        self
    }

    /// Every successful `produce` call takes `delay` before the producer exists.
    #[must_use]
    pub fn delay_produce(mut self, delay: Duration) -> Self {
        self.produce_delay = Some(delay);
        self
    }

    /// Build the MockEngine.
    #[must_use]
    pub fn build(self) -> Arc<MockEngine> {
        Arc::new(MockEngine {
            fail_create_transport: self.fail_create_transport,
            fail_produce: self.fail_produce,
            fail_consume: self.fail_consume,
            reject_consume: self.reject_consume,
            produce_delay: self.produce_delay,
            ..MockEngine::default()
        })
    }
}
