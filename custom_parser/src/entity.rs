use custom_bitreader::BitReader;

use crate::{
    common::Vector,
    error::Result,
    sendtable::{
        SendPropType, SendPropertyFlagsTrait, SendTableProperty, PROP_FLAGS_SPECIAL_FLOAT,
        PROP_FLAG_CELL_COORD_INTEGRAL, PROP_FLAG_CELL_COORD_LOW_PRECISION, PROP_FLAG_COORD,
        PROP_FLAG_COORD_MP, PROP_FLAG_COORD_MP_INTEGRAL, PROP_FLAG_COORD_MP_LOW_PRECISION,
        PROP_FLAG_NORMAL, PROP_FLAG_NO_SCALE, PROP_FLAG_UNSIGNED, PROP_FLAG_VAR_INT,
    },
    serverclass::FlattenedPropEntry,
    ParserError,
};

const MAX_STRING_PROP_LENGTH: u32 = 512;
const STRING_PROP_LENGTH_BITS: usize = 9;
const PROP_INDICES_VEC_CAP: usize = 64;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum PropertyValue {
    #[default]
    None,
    Integer(i32),
    Float(f64),
    Vector(Vector),
    String(String),
    Array(Vec<PropertyValue>),
}

impl PropertyValue {
    pub fn as_integer(&self) -> Option<i32> {
        match self {
            PropertyValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<Vector> {
        match self {
            PropertyValue::Vector(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(v) => Some(v),
            _ => None,
        }
    }
}

/// One live networked object. Property values are stored by flattened index.
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: i32,
    pub class_index: usize,
    pub serial: u32,
    pub props: Vec<PropertyValue>,
}

impl Entity {
    pub fn new(id: i32, class_index: usize, serial: u32, prop_count: usize) -> Self {
        Self {
            id,
            class_index,
            serial,
            props: vec![PropertyValue::None; prop_count],
        }
    }
}

/// Reads the list of changed field indices that prefixes every entity delta.
pub fn read_field_indices(r: &mut BitReader<'_>, indices: &mut Vec<usize>) -> Result<()> {
    indices.clear();
    let new_way = r.read_bit()?;
    let mut idx = -1;
    while let Some(next) = r.read_field_index(idx, new_way)? {
        indices.push(next as usize);
        idx = next;
    }
    Ok(())
}

/// Decodes a full baseline blob into `(index, value)` pairs sorted by index.
pub fn decode_baseline(
    class_name: &str,
    props: &[FlattenedPropEntry],
    data: &[u8],
) -> Result<Vec<(usize, PropertyValue)>> {
    let mut r = BitReader::new(data);
    let mut indices = Vec::with_capacity(PROP_INDICES_VEC_CAP);
    read_field_indices(&mut r, &mut indices)?;

    let mut values = vec![None; props.len()];
    for &idx in indices.iter() {
        let entry = flattened_prop(class_name, props, idx)?;
        values[idx] = Some(decode_prop(entry, &mut r)?);
    }

    Ok(values
        .into_iter()
        .enumerate()
        .filter_map(|(idx, v)| v.map(|v| (idx, v)))
        .collect())
}

pub fn flattened_prop<'a>(
    class_name: &str,
    props: &'a [FlattenedPropEntry],
    idx: usize,
) -> Result<&'a FlattenedPropEntry> {
    props.get(idx).ok_or_else(|| ParserError::FieldIndexOutOfRange {
        class: class_name.to_string(),
        index: idx,
        len: props.len(),
    })
}

pub fn decode_prop(entry: &FlattenedPropEntry, r: &mut BitReader<'_>) -> Result<PropertyValue> {
    let prop = &entry.prop;
    Ok(match SendPropType::try_from(prop.raw_type)? {
        SendPropType::Int => PropertyValue::Integer(decode_int(prop, r)?),
        SendPropType::Float => PropertyValue::Float(decode_float(prop, r)?),
        SendPropType::Vector => PropertyValue::Vector(decode_vector(prop, r)?),
        SendPropType::VectorXY => PropertyValue::Vector(decode_vector_xy(prop, r)?),
        SendPropType::String => PropertyValue::String(decode_string(r)?),
        SendPropType::Array => PropertyValue::Array(decode_array(entry, r)?),
        SendPropType::DataTable => return Err(ParserError::UnknownPropertyType(prop.raw_type)),
    })
}

fn decode_int(prop: &SendTableProperty, r: &mut BitReader<'_>) -> Result<i32> {
    let unsigned = prop.flags.has_flag_set(PROP_FLAG_UNSIGNED);
    Ok(if prop.flags.has_flag_set(PROP_FLAG_VAR_INT) {
        if unsigned {
            r.read_varint32()? as i32
        } else {
            r.read_signed_varint32()?
        }
    } else if unsigned {
        r.read_int(prop.num_bits as usize)? as i32
    } else {
        r.read_signed_int(prop.num_bits as usize)?
    })
}

fn decode_float(prop: &SendTableProperty, r: &mut BitReader<'_>) -> Result<f64> {
    if prop.flags & PROP_FLAGS_SPECIAL_FLOAT != 0 {
        return decode_special_float(prop, r);
    }

    let bits = prop.num_bits.clamp(0, 32) as usize;
    let raw = r.read_int(bits)? as f64;
    let max = ((1_u64 << bits) - 1) as f64;
    Ok(prop.low_value as f64 + (prop.high_value - prop.low_value) as f64 * (raw / max))
}

fn decode_special_float(prop: &SendTableProperty, r: &mut BitReader<'_>) -> Result<f64> {
    let flags = prop.flags;
    let v = if flags.has_flag_set(PROP_FLAG_COORD) {
        r.read_bitcoord()?
    } else if flags.has_flag_set(PROP_FLAG_COORD_MP) {
        r.read_bitcoordmp(false, false)?
    } else if flags.has_flag_set(PROP_FLAG_COORD_MP_LOW_PRECISION) {
        r.read_bitcoordmp(false, true)?
    } else if flags.has_flag_set(PROP_FLAG_COORD_MP_INTEGRAL) {
        r.read_bitcoordmp(true, false)?
    } else if flags.has_flag_set(PROP_FLAG_NO_SCALE) {
        r.read_float()?
    } else if flags.has_flag_set(PROP_FLAG_NORMAL) {
        r.read_bitnormal()?
    } else {
        r.read_bitcellcoord(
            prop.num_bits as usize,
            flags.has_flag_set(PROP_FLAG_CELL_COORD_INTEGRAL),
            flags.has_flag_set(PROP_FLAG_CELL_COORD_LOW_PRECISION),
        )?
    };
    Ok(v as f64)
}

fn decode_vector(prop: &SendTableProperty, r: &mut BitReader<'_>) -> Result<Vector> {
    let x = decode_float(prop, r)?;
    let y = decode_float(prop, r)?;

    if !prop.flags.has_flag_set(PROP_FLAG_NORMAL) {
        return Ok(Vector::new(x, y, decode_float(prop, r)?));
    }

    // Unit vector: z is implied, only its sign is sent.
    let absolute = x * x + y * y;
    let is_neg = r.read_bit()?;
    let z = if absolute < 1.0 {
        (1.0 - absolute).sqrt()
    } else {
        0.0
    };
    Ok(Vector::new(x, y, if is_neg { -z } else { z }))
}

fn decode_vector_xy(prop: &SendTableProperty, r: &mut BitReader<'_>) -> Result<Vector> {
    let x = decode_float(prop, r)?;
    let y = decode_float(prop, r)?;
    Ok(Vector::new(x, y, 0.0))
}

fn decode_string(r: &mut BitReader<'_>) -> Result<String> {
    let length = r.read_int(STRING_PROP_LENGTH_BITS)?.min(MAX_STRING_PROP_LENGTH);
    Ok(r.read_cstring(length as usize)?)
}

fn decode_array(entry: &FlattenedPropEntry, r: &mut BitReader<'_>) -> Result<Vec<PropertyValue>> {
    let elem = entry
        .array_elem_prop
        .as_ref()
        .ok_or_else(|| ParserError::MissingArrayElement(entry.name.clone()))?;

    let num_elems = entry.prop.num_elems.max(1) as u32;
    let count_bits = (u32::BITS - num_elems.leading_zeros()) as usize;
    let count = r.read_int(count_bits)?;

    let elem_entry = FlattenedPropEntry {
        prop: elem.clone(),
        array_elem_prop: None,
        name: entry.name.clone(),
    };

    (0..count).map(|_| decode_prop(&elem_entry, r)).collect()
}
