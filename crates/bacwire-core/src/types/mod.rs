/// Declares an enum of named BACnet code points with a catch-all variant and
/// the `to_*`/`from_*` conversions between them.
macro_rules! code_points {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $repr:ty, $to:ident, $from:ident, $other:ident {
            $($variant:ident = $value:literal,)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        $vis enum $name {
            $($variant,)*
            $other($repr),
        }

        impl $name {
            pub const fn $to(self) -> $repr {
                match self {
                    $(Self::$variant => $value,)*
                    Self::$other(v) => v,
                }
            }

            pub const fn $from(value: $repr) -> Self {
                match value {
                    $($value => Self::$variant,)*
                    v => Self::$other(v),
                }
            }
        }
    };
}

pub mod bit_string;
pub mod data_value;
pub mod date_time;
pub mod object_id;
pub mod object_type;
pub mod property_id;
pub mod services_supported;
pub mod enums;

pub use bit_string::BitString;
pub use data_value::DataValue;
pub use date_time::{Date, Time};
pub use object_id::ObjectId;
pub use object_type::ObjectType;
pub use property_id::PropertyId;
pub use services_supported::ServicesSupported;
pub use enums::{EngineeringUnits, ErrorClass, ErrorCode, EventState, MaxApdu, MaxSegments, Segmentation};
