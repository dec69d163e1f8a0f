code_points! {
    /// BACnet object types. Unlisted values round-trip through `Proprietary`.
    pub enum ObjectType: u16, to_u16, from_u16, Proprietary {
        AnalogInput = 0,
        AnalogOutput = 1,
        AnalogValue = 2,
        BinaryInput = 3,
        BinaryOutput = 4,
        BinaryValue = 5,
        Calendar = 6,
        Command = 7,
        Device = 8,
        EventEnrollment = 9,
        File = 10,
        Group = 11,
        Loop = 12,
        MultiStateInput = 13,
        MultiStateOutput = 14,
        NotificationClass = 15,
        Program = 16,
        Schedule = 17,
        Averaging = 18,
        MultiStateValue = 19,
        TrendLog = 20,
        Accumulator = 23,
        PulseConverter = 24,
        EventLog = 25,
        StructuredView = 29,
    }
}
