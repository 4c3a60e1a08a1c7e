use std::sync::Arc;

use async_trait::async_trait;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice::network_type::NetworkType;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_credential_type::RTCIceCredentialType;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCPFeedback;
use webrtc::track::track_local::TrackLocal;

use super::transport::{ConnectivityState, MediaConstraints, MediaTransport, TransportEvents, TransportFactory};
use crate::config::IceConfig;
use crate::error::{Result, SignalingError};
use crate::signaling::{IceCandidate, SdpType, SessionDescription};

/// VP8 video and Opus audio, IPv4 only, mDNS off.
pub fn create_webrtc_api() -> Result<Arc<API>> {
    let mut media_engine = MediaEngine::default();

    // keyframe recovery for late joiners depends on these
    let video_rtcp_feedback = vec![
        RTCPFeedback {
            typ: "goog-remb".to_string(),
            parameter: "".to_string(),
        },
        RTCPFeedback {
            typ: "ccm".to_string(),
            parameter: "fir".to_string(),
        },
        RTCPFeedback {
            typ: "nack".to_string(),
            parameter: "".to_string(),
        },
        RTCPFeedback {
            typ: "nack".to_string(),
            parameter: "pli".to_string(),
        },
    ];

    media_engine.register_codec(
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: "video/VP8".to_string(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: "".to_string(),
                rtcp_feedback: video_rtcp_feedback,
            },
            payload_type: 96,
            ..Default::default()
        },
        RTPCodecType::Video,
    )?;

    media_engine.register_codec(
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                rtcp_feedback: vec![],
            },
            payload_type: 111,
            ..Default::default()
        },
        RTPCodecType::Audio,
    )?;

    let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

    let mut setting_engine = SettingEngine::default();
    setting_engine.set_network_types(vec![NetworkType::Udp4, NetworkType::Tcp4]);
    setting_engine.set_ice_multicast_dns_mode(webrtc::ice::mdns::MulticastDnsMode::Disabled);

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .with_setting_engine(setting_engine)
        .build();

    Ok(Arc::new(api))
}

pub fn ice_servers(config: &IceConfig) -> Vec<RTCIceServer> {
    let mut ice_servers = Vec::new();

    for stun_server in &config.stun_servers {
        ice_servers.push(RTCIceServer {
            urls: vec![stun_server.clone()],
            ..Default::default()
        });
    }

    for turn_server in &config.turn_servers {
        ice_servers.push(RTCIceServer {
            urls: turn_server.urls.clone(),
            username: turn_server.username.clone(),
            credential: turn_server.credential.clone(),
            credential_type: RTCIceCredentialType::Password,
        });
    }

    ice_servers
}

impl From<RTCPeerConnectionState> for ConnectivityState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => ConnectivityState::New,
            RTCPeerConnectionState::Connecting => ConnectivityState::Connecting,
            RTCPeerConnectionState::Connected => ConnectivityState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectivityState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectivityState::Failed,
            RTCPeerConnectionState::Closed => ConnectivityState::Closed,
        }
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let rtc = match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(description.sdp)?,
        SdpType::Pranswer => RTCSessionDescription::pranswer(description.sdp)?,
        SdpType::Rollback => {
            return Err(SignalingError::webrtc_api("rollback descriptions are not supported"));
        }
    };
    Ok(rtc)
}

fn from_rtc_description(description: RTCSessionDescription) -> Result<SessionDescription> {
    let sdp_type = match description.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => {
            return Err(SignalingError::webrtc_api("engine produced an untyped description"));
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: description.sdp,
    })
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        }
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        IceCandidate {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
        }
    }
}

fn direction_for(receive: bool) -> RTCRtpTransceiverDirection {
    if receive {
        RTCRtpTransceiverDirection::Recvonly
    } else {
        RTCRtpTransceiverDirection::Inactive
    }
}

/// One peer connection driven by a negotiation session
pub struct WebRtcTransport {
    remote_id: String,
    peer_connection: Arc<RTCPeerConnection>,
}

impl WebRtcTransport {
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }
}

#[async_trait]
impl MediaTransport for WebRtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.peer_connection.create_offer(None).await?;
        from_rtc_description(offer)
    }

    async fn create_answer(&self, constraints: MediaConstraints) -> Result<SessionDescription> {
        for transceiver in self.peer_connection.get_transceivers().await {
            let direction = match transceiver.kind() {
                RTPCodecType::Video => direction_for(constraints.receive_video),
                RTPCodecType::Audio => direction_for(constraints.receive_audio),
                RTPCodecType::Unspecified => continue,
            };
            transceiver.set_direction(direction).await;
        }

        let answer = self.peer_connection.create_answer(None).await?;
        from_rtc_description(answer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let description = to_rtc_description(description)?;
        self.peer_connection.set_local_description(description).await?;
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let description = to_rtc_description(description)?;
        self.peer_connection.set_remote_description(description).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.peer_connection.add_ice_candidate(candidate.into()).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        tracing::debug!(remote_id = %self.remote_id, "Closing peer connection");
        self.peer_connection.close().await?;
        Ok(())
    }
}

/// Builds peer connections for either end of a classroom stream.
///
/// A publisher attaches its local tracks to every connection it creates; a
/// viewer only receives.
#[derive(Clone)]
pub struct WebRtcTransportFactory {
    api: Arc<API>,
    ice_servers: Vec<RTCIceServer>,
    tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>,
}

impl WebRtcTransportFactory {
    pub fn publisher(api: Arc<API>, ice: &IceConfig, tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>) -> Self {
        Self {
            api,
            ice_servers: ice_servers(ice),
            tracks,
        }
    }

    pub fn viewer(api: Arc<API>, ice: &IceConfig) -> Self {
        Self::publisher(api, ice, Vec::new())
    }

    fn register_callbacks(peer_connection: &RTCPeerConnection, events: &TransportEvents) {
        let candidate_events = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate| {
            let events = candidate_events.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => events.local_candidate(init.into()),
                    Err(e) => {
                        tracing::warn!(remote_id = %events.remote_id(), error = %e, "Could not serialize local candidate");
                    }
                }
            })
        }));

        let state_events = events.clone();
        peer_connection.on_peer_connection_state_change(Box::new(move |state| {
            let events = state_events.clone();
            Box::pin(async move {
                tracing::debug!(remote_id = %events.remote_id(), state = %state, "Peer connection state changed");
                events.connectivity(state.into());
            })
        }));

        let remote_id = events.remote_id().to_string();
        peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let remote_id = remote_id.clone();
            Box::pin(async move {
                tracing::info!(
                    remote_id = %remote_id,
                    track_id = %track.id(),
                    kind = %track.kind(),
                    "Receiving remote track"
                );

                tokio::spawn(async move {
                    let mut packets: u64 = 0;
                    while track.read_rtp().await.is_ok() {
                        packets += 1;
                    }
                    tracing::info!(remote_id = %remote_id, packets, "Remote track ended");
                });
            })
        }));
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    type Transport = WebRtcTransport;

    async fn create(&self, events: TransportEvents) -> Result<WebRtcTransport> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let peer_connection = Arc::new(self.api.new_peer_connection(config).await?);
        Self::register_callbacks(&peer_connection, &events);

        for track in &self.tracks {
            peer_connection.add_track(Arc::clone(track)).await?;
        }

        tracing::debug!(
            remote_id = %events.remote_id(),
            tracks = self.tracks.len(),
            "Peer connection created"
        );

        Ok(WebRtcTransport {
            remote_id: events.remote_id().to_string(),
            peer_connection,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TurnServer;

    #[test]
    fn test_ice_servers_from_config() {
        let config = IceConfig {
            stun_servers: vec!["stun:stun.example.org:3478".to_string()],
            turn_servers: vec![TurnServer {
                urls: vec!["turn:turn.example.org:3478".to_string()],
                username: "classroom".to_string(),
                credential: "secret".to_string(),
            }],
        };

        let servers = ice_servers(&config);
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].urls, vec!["stun:stun.example.org:3478".to_string()]);
        assert!(servers[0].username.is_empty());
        assert_eq!(servers[1].username, "classroom");
        assert_eq!(servers[1].credential_type, RTCIceCredentialType::Password);
    }

    #[test]
    fn test_connectivity_mapping() {
        assert_eq!(ConnectivityState::from(RTCPeerConnectionState::Connected), ConnectivityState::Connected);
        assert_eq!(ConnectivityState::from(RTCPeerConnectionState::Unspecified), ConnectivityState::New);
        assert_eq!(ConnectivityState::from(RTCPeerConnectionState::Failed), ConnectivityState::Failed);
    }

    #[test]
    fn test_candidate_conversion_keeps_fields() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };
        let init: RTCIceCandidateInit = candidate.clone().into();
        assert_eq!(init.sdp_mid.as_deref(), Some("0"));
        assert_eq!(IceCandidate::from(init), candidate);
    }

    #[test]
    fn test_rollback_is_rejected() {
        let rollback = SessionDescription {
            sdp_type: SdpType::Rollback,
            sdp: String::new(),
        };
        assert!(matches!(to_rtc_description(rollback), Err(SignalingError::WebRtcApi(_))));
    }

    #[tokio::test]
    async fn test_viewer_answers_publisher_offer() {
        let api = create_webrtc_api().unwrap();
        let ice = IceConfig {
            stun_servers: vec![],
            turn_servers: vec![],
        };
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();

        let offerer = WebRtcTransportFactory::viewer(api.clone(), &ice);
        let offerer = offerer.create(TransportEvents::new("student", 1, tx.clone())).await.unwrap();
        offerer
            .peer_connection()
            .add_transceiver_from_kind(RTPCodecType::Video, None)
            .await
            .unwrap();
        offerer
            .peer_connection()
            .add_transceiver_from_kind(RTPCodecType::Audio, None)
            .await
            .unwrap();

        let offer = offerer.create_offer().await.unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
        offerer.set_local_description(offer.clone()).await.unwrap();

        let answerer = WebRtcTransportFactory::viewer(api, &ice);
        let answerer = answerer.create(TransportEvents::new("teacher", 1, tx)).await.unwrap();
        answerer.set_remote_description(offer).await.unwrap();
        let answer = answerer.create_answer(MediaConstraints::VIEWER).await.unwrap();
        assert_eq!(answer.sdp_type, SdpType::Answer);
        assert!(answer.sdp.contains("m=video"));

        offerer.close().await.unwrap();
        answerer.close().await.unwrap();
    }
}
