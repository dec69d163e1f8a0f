code_points! {
    /// BACnet property identifiers used by the device and value objects served
    /// here. Anything else is carried as `Proprietary`.
    pub enum PropertyId: u32, to_u32, from_u32, Proprietary {
        Description = 28,
        EventState = 36,
        MaxApduLengthAccepted = 62,
        ObjectIdentifier = 75,
        ObjectList = 76,
        ObjectName = 77,
        ObjectType = 79,
        OutOfService = 81,
        PresentValue = 85,
        ProtocolServicesSupported = 97,
        SegmentationSupported = 107,
        StatusFlags = 111,
        Units = 117,
        VendorIdentifier = 120,
        VendorName = 121,
    }
}

#[cfg(test)]
mod tests {
    use super::PropertyId;

    #[test]
    fn maps_known_and_unknown_ids() {
        assert_eq!(PropertyId::from_u32(76), PropertyId::ObjectList);
        assert_eq!(PropertyId::SegmentationSupported.to_u32(), 107);
        assert_eq!(PropertyId::from_u32(4000), PropertyId::Proprietary(4000));
    }
}
