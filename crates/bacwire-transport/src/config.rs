use crate::TransportError;
use bacwire_core::services::IAmRequest;
use bacwire_core::types::{MaxApdu, MaxSegments, ObjectId, Segmentation};
use std::time::Duration;

/// Tunables for one local device's transport.
///
/// Timeouts, retries and the proposed window size are ordinary settings; the
/// defaults suit a lightly loaded IP network.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct TransportConfig {
    pub device_instance: u32,
    pub vendor_id: u16,
    /// Largest APDU this device accepts, advertised in requests and I-Am.
    pub max_apdu: MaxApdu,
    pub max_segments: MaxSegments,
    pub segmentation: Segmentation,
    /// Wait for a final response before retransmitting the request.
    pub apdu_timeout: Duration,
    /// Wait for a segment-ack (or the next segment) before retransmitting.
    pub segment_timeout: Duration,
    pub retries: u8,
    /// Window size proposed in segmented messages this device sends.
    pub window_size: u8,
    /// How long a released invoke id stays out of rotation.
    pub invoke_id_grace: Duration,
    /// Upper bound on a reassembled APDU.
    pub reassembly_limit: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            device_instance: 0,
            vendor_id: 0,
            max_apdu: MaxApdu::UpTo1476,
            max_segments: MaxSegments::MoreThanSixtyFour,
            segmentation: Segmentation::SegmentedBoth,
            apdu_timeout: Duration::from_secs(3),
            segment_timeout: Duration::from_millis(500),
            retries: 2,
            window_size: 4,
            invoke_id_grace: Duration::ZERO,
            reassembly_limit: 1024 * 1024,
        }
    }
}

impl TransportConfig {
    pub fn new(device_instance: u32) -> Self {
        Self {
            device_instance,
            ..Self::default()
        }
    }

    pub fn with_vendor_id(mut self, vendor_id: u16) -> Self {
        self.vendor_id = vendor_id;
        self
    }

    pub fn with_max_apdu(mut self, max_apdu: MaxApdu) -> Self {
        self.max_apdu = max_apdu;
        self
    }

    pub fn with_max_segments(mut self, max_segments: MaxSegments) -> Self {
        self.max_segments = max_segments;
        self
    }

    pub fn with_segmentation(mut self, segmentation: Segmentation) -> Self {
        self.segmentation = segmentation;
        self
    }

    pub fn with_apdu_timeout(mut self, timeout: Duration) -> Self {
        self.apdu_timeout = timeout.max(Duration::from_millis(1));
        self
    }

    pub fn with_segment_timeout(mut self, timeout: Duration) -> Self {
        self.segment_timeout = timeout.max(Duration::from_millis(1));
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_window_size(mut self, window_size: u8) -> Self {
        self.window_size = window_size.clamp(1, 127);
        self
    }

    pub fn with_invoke_id_grace(mut self, grace: Duration) -> Self {
        self.invoke_id_grace = grace;
        self
    }

    pub fn with_reassembly_limit(mut self, limit: usize) -> Self {
        self.reassembly_limit = limit;
        self
    }

    pub fn device_id(&self) -> ObjectId {
        ObjectId::device(self.device_instance)
    }

    /// The I-Am this device announces.
    pub fn i_am(&self) -> IAmRequest {
        IAmRequest {
            device_id: self.device_id(),
            max_apdu: self.max_apdu.octets() as u32,
            segmentation: self.segmentation,
            vendor_id: u32::from(self.vendor_id),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), TransportError> {
        if self.device_instance > ObjectId::MAX_INSTANCE {
            return Err(TransportError::InvalidConfig(
                "device instance exceeds 4194303",
            ));
        }
        if !(1..=127).contains(&self.window_size) {
            return Err(TransportError::InvalidConfig(
                "window size must be within 1..=127",
            ));
        }
        if self.apdu_timeout.is_zero() || self.segment_timeout.is_zero() {
            return Err(TransportError::InvalidConfig("timeouts must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::TransportConfig;
    use crate::TransportError;
    use bacwire_core::types::{MaxApdu, Segmentation};
    use std::time::Duration;

    #[test]
    fn defaults_are_valid() {
        let config = TransportConfig::new(12);
        config.validate().unwrap();
        assert_eq!(config.max_apdu, MaxApdu::UpTo1476);
        assert_eq!(config.segmentation, Segmentation::SegmentedBoth);
        assert_eq!(config.device_id().instance(), 12);
        let i_am = config.i_am();
        assert_eq!(i_am.max_apdu, 1476);
        assert_eq!(i_am.vendor_id, 0);
    }

    #[test]
    fn builders_clamp() {
        let config = TransportConfig::new(1)
            .with_window_size(0)
            .with_segment_timeout(Duration::ZERO);
        assert_eq!(config.window_size, 1);
        assert_eq!(config.segment_timeout, Duration::from_millis(1));
        config.validate().unwrap();
    }

    #[test]
    fn out_of_range_fields_fail_validation() {
        let config = TransportConfig {
            window_size: 200,
            ..TransportConfig::new(1)
        };
        assert!(matches!(
            config.validate(),
            Err(TransportError::InvalidConfig(_))
        ));
        assert!(TransportConfig::new(1 << 22).validate().is_err());
    }
}
