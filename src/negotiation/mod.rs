pub mod session;
pub mod supervisor;
pub mod transport;
pub mod webrtc_transport;

pub use session::{ConnectivityOutcome, NegotiationRole, NegotiationSession, NegotiationState};
pub use supervisor::{ConnectionStatus, StudentSupervisor, TeacherSupervisor};
pub use transport::{
    ConnectivityState, MediaConstraints, MediaTransport, SignalSender, TransportEvent, TransportEventKind,
    TransportEventReceiver, TransportEvents, TransportFactory,
};
pub use webrtc_transport::{WebRtcTransport, WebRtcTransportFactory};
