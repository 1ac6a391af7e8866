use thiserror::Error;

/// How an [Error] impacts a running [crate::prelude::Task].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Severity {
    /// Invalid setup, detected before the streaming loop starts.
    Configuration,
    /// The caster (or the link to it) failed permanently.
    Network,
    /// The requested mount point is not served by the caster.
    MountPoint,
    /// Only the current item or iteration is affected.
    Recoverable,
}

#[derive(Debug, Error)]
pub enum Error {
    /// NTRIP 2.0 variants are recognized but not wired to any
    /// network query implementation.
    #[error("ntrip version \"{0}\" is not supported")]
    UnsupportedNtripVersion(String),

    #[error("unknown ntrip version \"{0}\"")]
    UnknownNtripVersion(String),

    /// No [crate::prelude::Decoder] exists for this stream format.
    #[error("stream format \"{0}\" is not supported")]
    UnsupportedStreamFormat(String),

    #[error("invalid endpoint \"{0}\"")]
    InvalidEndpoint(String),

    /// Only RINEX V3 observations may be produced.
    #[error("rinex version {0} is not supported")]
    UnsupportedRinexVersion(f64),

    #[error("receive chunk size must be positive")]
    InvalidChunkSize,

    #[error("network error: {0}")]
    Network(std::io::Error),

    /// [crate::prelude::NetworkQuery] reported a permanent failure
    #[error("network query failure")]
    QueryFailure,

    #[error("connection closed by caster")]
    ConnectionClosed,

    #[error("caster refused credentials")]
    Unauthorized,

    #[error("caster rejected request: \"{0}\"")]
    CasterRejected(String),

    /// Caster replied with its source table: the mount point does not exist.
    #[error("mount point \"{0}\" not found")]
    MountPointNotFound(String),

    /// RINEX header or record could not be produced.
    #[error("rinex formatting: {0}")]
    RinexFormatting(String),

    #[error("decoding error: {0}")]
    Decoding(String),

    #[error("rtcm frame checksum mismatch")]
    BadChecksum,

    #[error("truncated rtcm message")]
    TruncatedMessage,

    #[error("decoder is not available")]
    DecoderUnavailable,

    #[error("failed to obtain system time")]
    SystemTime,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns the [Severity] of this [Error].
    pub fn severity(&self) -> Severity {
        match self {
            Self::UnsupportedNtripVersion(_)
            | Self::UnknownNtripVersion(_)
            | Self::UnsupportedStreamFormat(_)
            | Self::InvalidEndpoint(_)
            | Self::UnsupportedRinexVersion(_)
            | Self::InvalidChunkSize => Severity::Configuration,
            Self::Network(_)
            | Self::QueryFailure
            | Self::ConnectionClosed
            | Self::Unauthorized
            | Self::CasterRejected(_) => Severity::Network,
            Self::MountPointNotFound(_) => Severity::MountPoint,
            Self::Decoding(_)
            | Self::RinexFormatting(_)
            | Self::BadChecksum
            | Self::TruncatedMessage
            | Self::DecoderUnavailable
            | Self::SystemTime
            | Self::Io(_) => Severity::Recoverable,
        }
    }

    /// True when this [Error] should stop the streaming task.
    pub fn is_fatal(&self) -> bool {
        self.severity() != Severity::Recoverable
    }
}
