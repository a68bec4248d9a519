//! In-process media engine.
//!
//! Keeps the router/transport/producer/consumer graph in memory and binds one
//! UDP socket per transport so the advertised ICE candidate points at a real
//! port. Packet forwarding itself is out of scope; the graph is what the
//! signaling layer relies on.

use super::{
    ConsumeOptions, Consumer, DtlsFingerprint, DtlsParameters, DtlsRole, EngineError,
    IceCandidate, IceParameters, MediaEngine, MediaHandle, MediaKind, Producer, Router,
    RtpCapabilities, RtpCodecCapability, RtpHeaderExtension, RtpParameters, Transport,
    TransportProtocol,
};
use common::types::{ConsumerId, ProducerId, RouterId, TransportId};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// First dynamic payload type handed out to router codecs.
const FIRST_PAYLOAD_TYPE: u8 = 100;

const ICE_UFRAG_LEN: usize = 16;
const ICE_PASSWORD_LEN: usize = 32;
const HOST_CANDIDATE_PRIORITY: u32 = 1_076_302_079;

/// Network settings for [`LocalEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEngineConfig {
    /// IP media sockets are bound on.
    pub listen_ip: IpAddr,
    /// IP advertised in ICE candidates (defaults to the bound address).
    pub announced_ip: Option<IpAddr>,
}

impl LocalEngineConfig {
    /// Loopback-only configuration, used by tests and local development.
    #[must_use]
    pub fn loopback() -> Self {
        Self {
            listen_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            announced_ip: None,
        }
    }
}

impl Default for LocalEngineConfig {
    fn default() -> Self {
        Self {
            listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            announced_ip: None,
        }
    }
}

/// Counts of live engine resources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub routers: usize,
    pub transports: usize,
    pub producers: usize,
    pub consumers: usize,
}

struct RouterState {
    capabilities: RtpCapabilities,
}

struct TransportState {
    router: RouterId,
    // Held for its lifetime; dropping it releases the port.
    _socket: UdpSocket,
    producers: HashSet<ProducerId>,
    consumers: HashSet<ConsumerId>,
    next_mid: u32,
}

struct ProducerState {
    router: RouterId,
    transport: TransportId,
    rtp_parameters: RtpParameters,
    consumers: HashSet<ConsumerId>,
}

struct ConsumerState {
    transport: TransportId,
    producer: ProducerId,
}

#[derive(Default)]
struct EngineState {
    routers: HashMap<RouterId, RouterState>,
    transports: HashMap<TransportId, TransportState>,
    producers: HashMap<ProducerId, ProducerState>,
    consumers: HashMap<ConsumerId, ConsumerState>,
}

impl EngineState {
    fn close_transport(&mut self, id: TransportId) {
        let Some(transport) = self.transports.remove(&id) else {
            return;
        };
        for producer in transport.producers {
            self.close_producer(producer);
        }
        for consumer in transport.consumers {
            self.close_consumer(consumer);
        }
        debug!(target: "sfu.engine", transport_id = %id, "Transport closed");
    }

    fn close_producer(&mut self, id: ProducerId) {
        let Some(producer) = self.producers.remove(&id) else {
            return;
        };
        if let Some(transport) = self.transports.get_mut(&producer.transport) {
            transport.producers.remove(&id);
        }
        for consumer in producer.consumers {
            self.close_consumer(consumer);
        }
        debug!(target: "sfu.engine", producer_id = %id, "Producer closed");
    }

    fn close_consumer(&mut self, id: ConsumerId) {
        let Some(consumer) = self.consumers.remove(&id) else {
            return;
        };
        if let Some(transport) = self.transports.get_mut(&consumer.transport) {
            transport.consumers.remove(&id);
        }
        if let Some(producer) = self.producers.get_mut(&consumer.producer) {
            producer.consumers.remove(&id);
        }
        debug!(target: "sfu.engine", consumer_id = %id, "Consumer closed");
    }

    /// Producer codecs the receiver can decode, in the producer's order.
    fn matching_codecs(
        &self,
        producer: &ProducerState,
        rtp_capabilities: &RtpCapabilities,
    ) -> Vec<super::RtpCodecParameters> {
        producer
            .rtp_parameters
            .codecs
            .iter()
            .filter(|codec| rtp_capabilities.codecs.iter().any(|cap| cap.matches(codec)))
            .cloned()
            .collect()
    }
}

/// In-process [`MediaEngine`].
pub struct LocalEngine {
    config: LocalEngineConfig,
    fingerprint: DtlsFingerprint,
    state: RwLock<EngineState>,
}

impl LocalEngine {
    #[must_use]
    pub fn new(config: LocalEngineConfig) -> Self {
        Self {
            config,
            fingerprint: DtlsFingerprint {
                algorithm: "sha-256".to_string(),
                value: random_fingerprint(),
            },
            state: RwLock::new(EngineState::default()),
        }
    }

    /// Snapshot of live resource counts.
    pub async fn stats(&self) -> EngineStats {
        let state = self.state.read().await;
        EngineStats {
            routers: state.routers.len(),
            transports: state.transports.len(),
            producers: state.producers.len(),
            consumers: state.consumers.len(),
        }
    }

    fn announced_ip(&self, bound: SocketAddr) -> IpAddr {
        self.config.announced_ip.unwrap_or(bound.ip())
    }
}

#[async_trait::async_trait]
impl MediaEngine for LocalEngine {
    async fn create_router(
        &self,
        media_codecs: Vec<RtpCodecCapability>,
    ) -> Result<Router, EngineError> {
        if media_codecs.is_empty() {
            return Err(EngineError::RouterInit("no media codecs".to_string()));
        }

        let mut codecs = Vec::with_capacity(media_codecs.len());
        let mut payload_type = FIRST_PAYLOAD_TYPE;
        for mut codec in media_codecs {
            if MediaKind::from_mime_type(&codec.mime_type) != Some(codec.kind) {
                return Err(EngineError::RouterInit(format!(
                    "codec {} does not match kind {}",
                    codec.mime_type,
                    codec.kind.as_str()
                )));
            }
            codec.preferred_payload_type = Some(payload_type);
            payload_type = payload_type
                .checked_add(1)
                .ok_or_else(|| EngineError::RouterInit("too many codecs".to_string()))?;
            codecs.push(codec);
        }

        let capabilities = RtpCapabilities {
            codecs,
            header_extensions: default_header_extensions(),
        };
        let router = Router {
            id: RouterId::new(),
            rtp_capabilities: capabilities.clone(),
        };

        self.state
            .write()
            .await
            .routers
            .insert(router.id, RouterState { capabilities });

        info!(
            target: "sfu.engine",
            router_id = %router.id,
            codecs = router.rtp_capabilities.codecs.len(),
            "Router created"
        );
        Ok(router)
    }

    async fn create_transport(&self, router: RouterId) -> Result<Transport, EngineError> {
        if !self.state.read().await.routers.contains_key(&router) {
            return Err(EngineError::UnknownRouter(router));
        }

        let socket = UdpSocket::bind(SocketAddr::new(self.config.listen_ip, 0))
            .await
            .map_err(|e| EngineError::Io(format!("failed to bind media socket: {e}")))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| EngineError::Io(format!("failed to read socket address: {e}")))?;

        let transport = Transport {
            id: TransportId::new(),
            ice_parameters: IceParameters {
                username_fragment: random_string(ICE_UFRAG_LEN),
                password: random_string(ICE_PASSWORD_LEN),
                ice_lite: true,
            },
            ice_candidates: vec![IceCandidate {
                foundation: "udpcandidate".to_string(),
                priority: HOST_CANDIDATE_PRIORITY,
                ip: self.announced_ip(local_addr).to_string(),
                port: local_addr.port(),
                protocol: TransportProtocol::Udp,
                candidate_type: "host".to_string(),
            }],
            dtls_parameters: DtlsParameters {
                role: DtlsRole::Auto,
                fingerprints: vec![self.fingerprint.clone()],
            },
        };

        let mut state = self.state.write().await;
        // Router may not be closed today, but keep the graph consistent.
        if !state.routers.contains_key(&router) {
            return Err(EngineError::UnknownRouter(router));
        }
        state.transports.insert(
            transport.id,
            TransportState {
                router,
                _socket: socket,
                producers: HashSet::new(),
                consumers: HashSet::new(),
                next_mid: 0,
            },
        );

        debug!(
            target: "sfu.engine",
            transport_id = %transport.id,
            port = local_addr.port(),
            "Transport created"
        );
        Ok(transport)
    }

    async fn can_consume(
        &self,
        router: RouterId,
        producer: ProducerId,
        rtp_capabilities: &RtpCapabilities,
    ) -> bool {
        let state = self.state.read().await;
        match state.producers.get(&producer) {
            Some(p) if p.router == router => {
                !state.matching_codecs(p, rtp_capabilities).is_empty()
            }
            _ => false,
        }
    }

    async fn produce(
        &self,
        transport: TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<Producer, EngineError> {
        let mut state = self.state.write().await;

        let router = state
            .transports
            .get(&transport)
            .map(|t| t.router)
            .ok_or(EngineError::UnknownTransport(transport))?;
        let capabilities = &state
            .routers
            .get(&router)
            .ok_or(EngineError::UnknownRouter(router))?
            .capabilities;

        if rtp_parameters.codecs.is_empty() {
            return Err(EngineError::UnsupportedCodec("no codecs".to_string()));
        }
        for codec in &rtp_parameters.codecs {
            if codec.kind() != Some(kind) {
                return Err(EngineError::UnsupportedCodec(format!(
                    "{} is not a {} codec",
                    codec.mime_type,
                    kind.as_str()
                )));
            }
            if !capabilities.codecs.iter().any(|cap| cap.matches(codec)) {
                return Err(EngineError::UnsupportedCodec(codec.mime_type.clone()));
            }
        }

        let producer = Producer {
            id: ProducerId::new(),
            kind,
            rtp_parameters,
        };

        state.producers.insert(
            producer.id,
            ProducerState {
                router,
                transport,
                rtp_parameters: producer.rtp_parameters.clone(),
                consumers: HashSet::new(),
            },
        );
        if let Some(t) = state.transports.get_mut(&transport) {
            t.producers.insert(producer.id);
        }

        debug!(
            target: "sfu.engine",
            producer_id = %producer.id,
            transport_id = %transport,
            kind = kind.as_str(),
            "Producer created"
        );
        Ok(producer)
    }

    async fn consume(
        &self,
        transport: TransportId,
        producer: ProducerId,
        rtp_capabilities: &RtpCapabilities,
        options: ConsumeOptions,
    ) -> Result<Consumer, EngineError> {
        let mut state = self.state.write().await;

        let router = state
            .transports
            .get(&transport)
            .map(|t| t.router)
            .ok_or(EngineError::UnknownTransport(transport))?;
        let source = state
            .producers
            .get(&producer)
            .filter(|p| p.router == router)
            .ok_or(EngineError::UnknownProducer(producer))?;

        let codecs = state.matching_codecs(source, rtp_capabilities);
        let kind = match codecs.first().and_then(super::RtpCodecParameters::kind) {
            Some(kind) => kind,
            None => return Err(EngineError::Incompatible),
        };

        let rtcp = source.rtp_parameters.rtcp.clone();
        let header_extensions = source.rtp_parameters.header_extensions.clone();

        let Some(t) = state.transports.get_mut(&transport) else {
            return Err(EngineError::UnknownTransport(transport));
        };
        let mid = t.next_mid;
        t.next_mid = t.next_mid.wrapping_add(1);

        let consumer = Consumer {
            id: ConsumerId::new(),
            producer_id: producer,
            kind,
            rtp_parameters: RtpParameters {
                mid: Some(mid.to_string()),
                codecs,
                header_extensions,
                encodings: vec![serde_json::json!({ "ssrc": rand::thread_rng().gen::<u32>() })],
                rtcp,
            },
            paused: options.paused,
        };

        t.consumers.insert(consumer.id);
        if let Some(p) = state.producers.get_mut(&producer) {
            p.consumers.insert(consumer.id);
        }
        state.consumers.insert(
            consumer.id,
            ConsumerState {
                transport,
                producer,
            },
        );

        debug!(
            target: "sfu.engine",
            consumer_id = %consumer.id,
            producer_id = %producer,
            transport_id = %transport,
            paused = options.paused,
            "Consumer created"
        );
        Ok(consumer)
    }

    async fn close(&self, handle: MediaHandle) {
        let mut state = self.state.write().await;
        match handle {
            MediaHandle::Transport(id) => state.close_transport(id),
            MediaHandle::Producer(id) => state.close_producer(id),
            MediaHandle::Consumer(id) => state.close_consumer(id),
        }
    }
}

fn default_header_extensions() -> Vec<RtpHeaderExtension> {
    let ext = |kind, uri: &str, preferred_id| RtpHeaderExtension {
        kind,
        uri: uri.to_string(),
        preferred_id,
    };
    vec![
        ext(MediaKind::Audio, "urn:ietf:params:rtp-hdrext:sdes:mid", 1),
        ext(MediaKind::Video, "urn:ietf:params:rtp-hdrext:sdes:mid", 1),
        ext(
            MediaKind::Audio,
            "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time",
            4,
        ),
        ext(
            MediaKind::Video,
            "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time",
            4,
        ),
        ext(MediaKind::Audio, "urn:ietf:params:rtp-hdrext:ssrc-audio-level", 10),
    ]
}

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn random_fingerprint() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}
