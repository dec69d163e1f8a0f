/// Segmentation capability advertised during device discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Segmentation {
    SegmentedBoth = 0,
    SegmentedTransmit = 1,
    SegmentedReceive = 2,
    NoSegmentation = 3,
}

impl Segmentation {
    pub const fn to_u32(self) -> u32 {
        self as u32
    }

    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::SegmentedBoth),
            1 => Some(Self::SegmentedTransmit),
            2 => Some(Self::SegmentedReceive),
            3 => Some(Self::NoSegmentation),
            _ => None,
        }
    }

    /// The device can send segmented messages.
    pub const fn can_transmit(self) -> bool {
        matches!(self, Self::SegmentedBoth | Self::SegmentedTransmit)
    }

    /// The device can accept segmented messages.
    pub const fn can_receive(self) -> bool {
        matches!(self, Self::SegmentedBoth | Self::SegmentedReceive)
    }
}

/// Encoded max-APDU-length-accepted field of a confirmed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum MaxApdu {
    UpTo50 = 0,
    UpTo128 = 1,
    UpTo206 = 2,
    UpTo480 = 3,
    UpTo1024 = 4,
    UpTo1476 = 5,
}

impl MaxApdu {
    const ALL: [Self; 6] = [
        Self::UpTo50,
        Self::UpTo128,
        Self::UpTo206,
        Self::UpTo480,
        Self::UpTo1024,
        Self::UpTo1476,
    ];

    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Decodes the 4-bit field; reserved codes fall back to 480 octets.
    pub const fn from_u8(value: u8) -> Self {
        match value & 0x0f {
            0 => Self::UpTo50,
            1 => Self::UpTo128,
            2 => Self::UpTo206,
            4 => Self::UpTo1024,
            5 => Self::UpTo1476,
            _ => Self::UpTo480,
        }
    }

    pub const fn octets(self) -> usize {
        match self {
            Self::UpTo50 => 50,
            Self::UpTo128 => 128,
            Self::UpTo206 => 206,
            Self::UpTo480 => 480,
            Self::UpTo1024 => 1024,
            Self::UpTo1476 => 1476,
        }
    }

    /// Largest code whose size does not exceed `octets`.
    pub fn from_octets(octets: usize) -> Self {
        Self::ALL
            .iter()
            .rev()
            .copied()
            .find(|m| m.octets() <= octets)
            .unwrap_or(Self::UpTo50)
    }
}

/// Encoded max-segments-accepted field of a confirmed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum MaxSegments {
    Unspecified = 0,
    Two = 1,
    Four = 2,
    Eight = 3,
    Sixteen = 4,
    ThirtyTwo = 5,
    SixtyFour = 6,
    MoreThanSixtyFour = 7,
}

impl MaxSegments {
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    pub const fn from_u8(value: u8) -> Self {
        match value & 0x07 {
            1 => Self::Two,
            2 => Self::Four,
            3 => Self::Eight,
            4 => Self::Sixteen,
            5 => Self::ThirtyTwo,
            6 => Self::SixtyFour,
            7 => Self::MoreThanSixtyFour,
            _ => Self::Unspecified,
        }
    }

    /// Segment count limit, or `None` when the field sets no limit.
    pub const fn limit(self) -> Option<usize> {
        match self {
            Self::Unspecified | Self::MoreThanSixtyFour => None,
            Self::Two => Some(2),
            Self::Four => Some(4),
            Self::Eight => Some(8),
            Self::Sixteen => Some(16),
            Self::ThirtyTwo => Some(32),
            Self::SixtyFour => Some(64),
        }
    }
}

code_points! {
    /// BACnet error class reported in Error PDUs.
    pub enum ErrorClass: u32, to_u32, from_u32, Proprietary {
        Device = 0,
        Object = 1,
        Property = 2,
        Resources = 3,
        Security = 4,
        Services = 5,
        Vt = 6,
        Communication = 7,
    }
}

code_points! {
    /// BACnet error code reported in Error PDUs.
    pub enum ErrorCode: u32, to_u32, from_u32, Proprietary {
        Other = 0,
        ConfigurationInProgress = 2,
        DeviceBusy = 3,
        InconsistentParameters = 7,
        InvalidDataType = 9,
        MissingRequiredParameter = 16,
        NoSpaceToWriteProperty = 20,
        PropertyIsNotAList = 22,
        ServiceRequestDenied = 29,
        Timeout = 30,
        UnknownObject = 31,
        UnknownProperty = 32,
        UnsupportedObjectType = 36,
        ValueOutOfRange = 37,
        WriteAccessDenied = 40,
        InvalidArrayIndex = 42,
    }
}

code_points! {
    pub enum EventState: u32, to_u32, from_u32, Proprietary {
        Normal = 0,
        Fault = 1,
        Offnormal = 2,
        HighLimit = 3,
        LowLimit = 4,
    }
}

code_points! {
    /// A handful of engineering units; the rest travel as `Proprietary`.
    pub enum EngineeringUnits: u32, to_u32, from_u32, Proprietary {
        Btus = 20,
        Kilowatts = 48,
        DegreesCelsius = 62,
        DegreesFahrenheit = 64,
        NoUnits = 95,
        Percent = 98,
    }
}
