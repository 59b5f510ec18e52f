//! Typed field names for AMI frames.

/// Error returned when parsing an unrecognized field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseAmiHeaderError(pub String);

impl std::fmt::Display for ParseAmiHeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown AMI field: {}", self.0)
    }
}

impl std::error::Error for ParseAmiHeaderError {}

define_header_enum! {
    error_type: ParseAmiHeaderError,
    /// Field names that commonly appear in AMI commands, responses and events.
    ///
    /// Frames are open-ended maps, so this list is a convenience for lookups
    /// via [`Frame::header()`](crate::Frame::header), not a schema.
    pub enum AmiHeader {
        Action => "Action",
        ActionId => "ActionID",
        Response => "Response",
        Message => "Message",
        Event => "Event",
        Username => "Username",
        Secret => "Secret",
        Events => "Events",
        Privilege => "Privilege",
        Channel => "Channel",
        ChannelState => "ChannelState",
        ChannelStateDesc => "ChannelStateDesc",
        CallerIdNum => "CallerIDNum",
        CallerIdName => "CallerIDName",
        ConnectedLineNum => "ConnectedLineNum",
        ConnectedLineName => "ConnectedLineName",
        AccountCode => "AccountCode",
        Context => "Context",
        Exten => "Exten",
        Priority => "Priority",
        Uniqueid => "Uniqueid",
        Linkedid => "Linkedid",
        Cause => "Cause",
        CauseTxt => "Cause-txt",
    }
}

impl From<AmiHeader> for String {
    fn from(header: AmiHeader) -> Self {
        header
            .as_str()
            .to_string()
    }
}
