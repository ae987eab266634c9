use prost::Message;

/// Net message ids found inside Signon/Packet regions. Only the ones the
/// decoder acts on are named.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    SetConVar,
    ServerInfo,
    CreateStringTable,
    UpdateStringTable,
    PacketEntities,
    Other(u32),
}

impl From<u32> for MessageType {
    fn from(cmd: u32) -> Self {
        match cmd {
            6 => MessageType::SetConVar,
            8 => MessageType::ServerInfo,
            12 => MessageType::CreateStringTable,
            13 => MessageType::UpdateStringTable,
            26 => MessageType::PacketEntities,
            other => MessageType::Other(other),
        }
    }
}

impl From<MessageType> for u32 {
    fn from(msg: MessageType) -> Self {
        match msg {
            MessageType::SetConVar => 6,
            MessageType::ServerInfo => 8,
            MessageType::CreateStringTable => 12,
            MessageType::UpdateStringTable => 13,
            MessageType::PacketEntities => 26,
            MessageType::Other(other) => other,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Message)]
pub struct CsvcMsgPacketEntities {
    #[prost(int32, optional, tag = "1")]
    pub max_entries: Option<i32>,
    #[prost(int32, optional, tag = "2")]
    pub updated_entries: Option<i32>,
    #[prost(bool, optional, tag = "3")]
    pub is_delta: Option<bool>,
    #[prost(bool, optional, tag = "4")]
    pub update_baseline: Option<bool>,
    #[prost(int32, optional, tag = "5")]
    pub baseline: Option<i32>,
    #[prost(int32, optional, tag = "6")]
    pub delta_from: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "7")]
    pub entity_data: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct CsvcMsgServerInfo {
    #[prost(int32, optional, tag = "1")]
    pub protocol: Option<i32>,
    #[prost(int32, optional, tag = "11")]
    pub max_clients: Option<i32>,
    #[prost(int32, optional, tag = "12")]
    pub max_classes: Option<i32>,
    #[prost(float, optional, tag = "14")]
    pub tick_interval: Option<f32>,
    #[prost(string, optional, tag = "15")]
    pub game_dir: Option<String>,
    #[prost(string, optional, tag = "16")]
    pub map_name: Option<String>,
    #[prost(string, optional, tag = "19")]
    pub host_name: Option<String>,
}

impl CsvcMsgServerInfo {
    /// Server tick rate, rounded. Falls back to 128 when the interval is unset.
    pub fn tick_rate(&self) -> f32 {
        let interval = self.tick_interval();
        if interval <= 0.0 {
            128.0
        } else {
            (1.0 / interval).round()
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct CnetMsgSetConVar {
    #[prost(message, optional, tag = "1")]
    pub convars: Option<CMsgCVars>,
}

#[derive(Clone, PartialEq, Message)]
pub struct CMsgCVars {
    #[prost(message, repeated, tag = "1")]
    pub cvars: Vec<CVar>,
}

#[derive(Clone, PartialEq, Message)]
pub struct CVar {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub value: String,
    #[prost(uint32, optional, tag = "3")]
    pub dictionary_name: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids() {
        assert_eq!(MessageType::from(26), MessageType::PacketEntities);
        assert_eq!(MessageType::from(25), MessageType::Other(25));
        assert_eq!(u32::from(MessageType::UpdateStringTable), 13);
    }

    #[test]
    fn tick_rate_from_interval() {
        let info = CsvcMsgServerInfo {
            tick_interval: Some(1.0 / 64.0),
            ..Default::default()
        };
        assert_eq!(info.tick_rate(), 64.0);
        assert_eq!(CsvcMsgServerInfo::default().tick_rate(), 128.0);
    }
}
