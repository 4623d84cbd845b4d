pub mod audio;
pub mod health;
pub mod peer;
pub mod session;

// Re-export commonly used types for convenience
pub use audio::{AudioBatcher, AudioConverter, BatchConfig, ConvertError, ResamplerEngine};

pub use peer::{
    AiPeer, ConnectionState, PeerConfig, PeerError, PeerEvent, PeerResult, RealtimePeer,
    create_peer, supported_peer_providers,
};

pub use session::{
    CallSession, EndReason, Lifecycle, OutboundFrame, RegistryConfig, SessionError,
    SessionRegistry, TransportHandle,
};

pub use health::{
    Alert, AlertConfig, AlertManager, AlertSeverity, DependencyState, DependencyStatus,
    EventLog, HealthMonitor, HttpEventLog, LivenessSnapshot, OverallStatus, ReadinessSnapshot,
    TracingEventLog, install_panic_hook,
};
