use core::fmt;

/// Reason carried by a Reject PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RejectReason {
    Other,
    BufferOverflow,
    InconsistentParameters,
    InvalidParameterDataType,
    InvalidTag,
    MissingRequiredParameter,
    ParameterOutOfRange,
    TooManyArguments,
    UndefinedEnumeration,
    UnrecognizedService,
    Proprietary(u8),
}

impl RejectReason {
    pub const fn to_u8(self) -> u8 {
        match self {
            Self::Other => 0,
            Self::BufferOverflow => 1,
            Self::InconsistentParameters => 2,
            Self::InvalidParameterDataType => 3,
            Self::InvalidTag => 4,
            Self::MissingRequiredParameter => 5,
            Self::ParameterOutOfRange => 6,
            Self::TooManyArguments => 7,
            Self::UndefinedEnumeration => 8,
            Self::UnrecognizedService => 9,
            Self::Proprietary(v) => v,
        }
    }

    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Other,
            1 => Self::BufferOverflow,
            2 => Self::InconsistentParameters,
            3 => Self::InvalidParameterDataType,
            4 => Self::InvalidTag,
            5 => Self::MissingRequiredParameter,
            6 => Self::ParameterOutOfRange,
            7 => Self::TooManyArguments,
            8 => Self::UndefinedEnumeration,
            9 => Self::UnrecognizedService,
            v => Self::Proprietary(v),
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other => f.write_str("other"),
            Self::BufferOverflow => f.write_str("buffer-overflow"),
            Self::InconsistentParameters => f.write_str("inconsistent-parameters"),
            Self::InvalidParameterDataType => f.write_str("invalid-parameter-data-type"),
            Self::InvalidTag => f.write_str("invalid-tag"),
            Self::MissingRequiredParameter => f.write_str("missing-required-parameter"),
            Self::ParameterOutOfRange => f.write_str("parameter-out-of-range"),
            Self::TooManyArguments => f.write_str("too-many-arguments"),
            Self::UndefinedEnumeration => f.write_str("undefined-enumeration"),
            Self::UnrecognizedService => f.write_str("unrecognized-service"),
            Self::Proprietary(v) => write!(f, "proprietary({v})"),
        }
    }
}

/// Reason carried by an Abort PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AbortReason {
    Other,
    BufferOverflow,
    InvalidApduInThisState,
    PreemptedByHigherPriorityTask,
    SegmentationNotSupported,
    SecurityError,
    InsufficientSecurity,
    WindowSizeOutOfRange,
    ApplicationExceededReplyTime,
    OutOfResources,
    TsmTimeout,
    ApduTooLong,
    Proprietary(u8),
}

impl AbortReason {
    pub const fn to_u8(self) -> u8 {
        match self {
            Self::Other => 0,
            Self::BufferOverflow => 1,
            Self::InvalidApduInThisState => 2,
            Self::PreemptedByHigherPriorityTask => 3,
            Self::SegmentationNotSupported => 4,
            Self::SecurityError => 5,
            Self::InsufficientSecurity => 6,
            Self::WindowSizeOutOfRange => 7,
            Self::ApplicationExceededReplyTime => 8,
            Self::OutOfResources => 9,
            Self::TsmTimeout => 10,
            Self::ApduTooLong => 11,
            Self::Proprietary(v) => v,
        }
    }

    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Other,
            1 => Self::BufferOverflow,
            2 => Self::InvalidApduInThisState,
            3 => Self::PreemptedByHigherPriorityTask,
            4 => Self::SegmentationNotSupported,
            5 => Self::SecurityError,
            6 => Self::InsufficientSecurity,
            7 => Self::WindowSizeOutOfRange,
            8 => Self::ApplicationExceededReplyTime,
            9 => Self::OutOfResources,
            10 => Self::TsmTimeout,
            11 => Self::ApduTooLong,
            v => Self::Proprietary(v),
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other => f.write_str("other"),
            Self::BufferOverflow => f.write_str("buffer-overflow"),
            Self::InvalidApduInThisState => f.write_str("invalid-apdu-in-this-state"),
            Self::PreemptedByHigherPriorityTask => f.write_str("preempted-by-higher-priority-task"),
            Self::SegmentationNotSupported => f.write_str("segmentation-not-supported"),
            Self::SecurityError => f.write_str("security-error"),
            Self::InsufficientSecurity => f.write_str("insufficient-security"),
            Self::WindowSizeOutOfRange => f.write_str("window-size-out-of-range"),
            Self::ApplicationExceededReplyTime => f.write_str("application-exceeded-reply-time"),
            Self::OutOfResources => f.write_str("out-of-resources"),
            Self::TsmTimeout => f.write_str("tsm-timeout"),
            Self::ApduTooLong => f.write_str("apdu-too-long"),
            Self::Proprietary(v) => write!(f, "proprietary({v})"),
        }
    }
}
