use prost::Message;

use crate::ParserError;

pub type SendPropertyFlags = i32;

pub const PROP_FLAG_UNSIGNED: SendPropertyFlags = 1;
pub const PROP_FLAG_COORD: SendPropertyFlags = 2;
pub const PROP_FLAG_NO_SCALE: SendPropertyFlags = 4;
pub const PROP_FLAG_NORMAL: SendPropertyFlags = 32;
pub const PROP_FLAG_EXCLUDE: SendPropertyFlags = 64;
pub const PROP_FLAG_INSIDE_ARRAY: SendPropertyFlags = 256;
pub const PROP_FLAG_COLLAPSIBLE: SendPropertyFlags = 2048;
pub const PROP_FLAG_COORD_MP: SendPropertyFlags = 4096;
pub const PROP_FLAG_COORD_MP_LOW_PRECISION: SendPropertyFlags = 8192;
pub const PROP_FLAG_COORD_MP_INTEGRAL: SendPropertyFlags = 16384;
pub const PROP_FLAG_CELL_COORD: SendPropertyFlags = 32768;
pub const PROP_FLAG_CELL_COORD_LOW_PRECISION: SendPropertyFlags = 65536;
pub const PROP_FLAG_CELL_COORD_INTEGRAL: SendPropertyFlags = 131072;
pub const PROP_FLAG_CHANGES_OFTEN: SendPropertyFlags = 262144;
pub const PROP_FLAG_VAR_INT: SendPropertyFlags = 524288;

/// Any of these selects a non-quantised float encoding.
pub const PROP_FLAGS_SPECIAL_FLOAT: SendPropertyFlags = PROP_FLAG_COORD
    | PROP_FLAG_NO_SCALE
    | PROP_FLAG_NORMAL
    | PROP_FLAG_COORD_MP
    | PROP_FLAG_COORD_MP_LOW_PRECISION
    | PROP_FLAG_COORD_MP_INTEGRAL
    | PROP_FLAG_CELL_COORD
    | PROP_FLAG_CELL_COORD_LOW_PRECISION
    | PROP_FLAG_CELL_COORD_INTEGRAL;

pub trait SendPropertyFlagsTrait {
    fn has_flag_set(self, flag: SendPropertyFlags) -> bool;
}

impl SendPropertyFlagsTrait for SendPropertyFlags {
    #[inline]
    fn has_flag_set(self, flag: SendPropertyFlags) -> bool {
        self & flag == flag
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPropType {
    Int = 0,
    Float = 1,
    Vector = 2,
    VectorXY = 3,
    String = 4,
    Array = 5,
    DataTable = 6,
}

impl TryFrom<i32> for SendPropType {
    type Error = ParserError;

    fn try_from(raw: i32) -> Result<Self, Self::Error> {
        Ok(match raw {
            0 => SendPropType::Int,
            1 => SendPropType::Float,
            2 => SendPropType::Vector,
            3 => SendPropType::VectorXY,
            4 => SendPropType::String,
            5 => SendPropType::Array,
            6 => SendPropType::DataTable,
            _ => return Err(ParserError::UnknownPropertyType(raw)),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SendTable {
    pub properties: Vec<SendTableProperty>,
    pub name: String,
    pub is_end: bool,
}

impl From<CsvcMsgSendTable> for SendTable {
    fn from(st: CsvcMsgSendTable) -> Self {
        Self {
            properties: st.props.iter().map(SendTableProperty::from).collect(),
            name: st.net_table_name().to_string(),
            is_end: st.is_end(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendTableProperty {
    pub flags: SendPropertyFlags,
    pub name: String,
    pub dt_name: String,
    pub low_value: f32,
    pub high_value: f32,
    pub num_bits: i32,
    pub num_elems: i32,
    pub priority: i32,
    pub raw_type: i32,
}

impl SendTableProperty {
    pub fn is_data_table(&self) -> bool {
        self.raw_type == SendPropType::DataTable as i32
    }
}

impl From<&SendpropT> for SendTableProperty {
    fn from(prop: &SendpropT) -> Self {
        Self {
            flags: prop.flags,
            dt_name: prop.dt_name().to_owned(),
            high_value: prop.high_value(),
            low_value: prop.low_value(),
            name: prop.var_name.to_owned(),
            num_bits: prop.num_bits,
            num_elems: prop.num_elements(),
            priority: prop.priority,
            raw_type: prop.r#type,
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct CsvcMsgSendTable {
    #[prost(bool, optional, tag = "1")]
    pub is_end: Option<bool>,
    #[prost(string, optional, tag = "2")]
    pub net_table_name: Option<String>,
    #[prost(bool, optional, tag = "3")]
    pub needs_decoder: Option<bool>,
    #[prost(message, repeated, tag = "4")]
    pub props: Vec<SendpropT>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SendpropT {
    #[prost(int32, tag = "1")]
    pub r#type: i32,
    #[prost(string, tag = "2")]
    pub var_name: String,
    #[prost(int32, tag = "3")]
    pub flags: i32,
    #[prost(int32, tag = "4")]
    pub priority: i32,
    #[prost(string, optional, tag = "5")]
    pub dt_name: Option<String>,
    #[prost(int32, optional, tag = "6")]
    pub num_elements: Option<i32>,
    #[prost(float, optional, tag = "7")]
    pub low_value: Option<f32>,
    #[prost(float, optional, tag = "8")]
    pub high_value: Option<f32>,
    #[prost(int32, tag = "9")]
    pub num_bits: i32,
}
