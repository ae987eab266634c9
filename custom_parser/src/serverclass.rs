use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use custom_bitreader::BitReader;
use log::{debug, trace};
use prost::Message;

use crate::{
    entity::{decode_baseline, PropertyValue},
    error::Result,
    sendtable::{
        CsvcMsgSendTable, SendPropType, SendPropertyFlagsTrait, SendTable, SendTableProperty,
        PROP_FLAG_CHANGES_OFTEN, PROP_FLAG_COLLAPSIBLE, PROP_FLAG_EXCLUDE, PROP_FLAG_INSIDE_ARRAY,
    },
    ParserError,
};

const SEND_TABLES_MIN: usize = 480;
const SERVER_CLASSES_MIN: usize = 284;
const FLATTENED_PROPS_CAP: usize = 256;

const SEND_TABLE_MESSAGE: u32 = 9;
const BASE_CLASS_PROP: &str = "baseclass";
const CHANGES_OFTEN_PRIORITY: i32 = 64;

#[derive(Debug, Clone, Default)]
pub struct ServerClass {
    pub id: usize,
    pub name: String,
    pub dt_name: String,
    /// Indices of the ancestor classes, root first.
    pub base_classes: Vec<usize>,
    pub flattened_props: Vec<FlattenedPropEntry>,
    pub prop_name_to_idx: HashMap<String, usize>,
}

impl ServerClass {
    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.prop_name_to_idx.get(name).copied()
    }
}

#[cfg(test)]
impl ServerClass {
    /// A class whose flattened properties are exactly `props`, in order.
    pub(crate) fn with_props(name: &str, props: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            flattened_props: props
                .iter()
                .map(|p| FlattenedPropEntry {
                    prop: SendTableProperty::default(),
                    array_elem_prop: None,
                    name: p.to_string(),
                })
                .collect(),
            prop_name_to_idx: props
                .iter()
                .enumerate()
                .map(|(i, p)| (p.to_string(), i))
                .collect(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlattenedPropEntry {
    pub prop: SendTableProperty,
    pub array_elem_prop: Option<SendTableProperty>,
    pub name: String,
}

/// The schema decoded from the DataTables block, plus the per-class
/// instance baselines received through string tables.
#[derive(Debug, Default)]
pub struct ServerClasses {
    classes: Vec<ServerClass>,
    by_name: HashMap<String, usize>,
    by_dt_name: HashMap<String, usize>,
    class_bits: usize,

    instance_baselines: HashMap<usize, Vec<u8>>,
    preprocessed_baselines: HashMap<usize, Vec<(usize, PropertyValue)>>,
}

impl ServerClasses {
    /// Builds the lookup tables over an already decoded class list.
    pub fn from_classes(classes: Vec<ServerClass>) -> Self {
        let mut this = Self {
            classes,
            ..Default::default()
        };
        this.reindex();
        this
    }

    fn reindex(&mut self) {
        self.by_name = self
            .classes
            .iter()
            .enumerate()
            .map(|(i, sc)| (sc.name.clone(), i))
            .collect();
        self.by_dt_name = self
            .classes
            .iter()
            .enumerate()
            .map(|(i, sc)| (sc.dt_name.clone(), i))
            .collect();

        let count = self.classes.len();
        self.class_bits = if count > 1 {
            (usize::BITS - (count - 1).leading_zeros()) as usize
        } else {
            0
        };
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ServerClass> {
        self.classes.iter()
    }

    pub fn as_slice(&self) -> &[ServerClass] {
        &self.classes
    }

    pub fn get(&self, class_id: usize) -> Result<&ServerClass> {
        self.classes
            .get(class_id)
            .ok_or(ParserError::InvalidClassId {
                id: class_id,
                count: self.classes.len(),
            })
    }

    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn find_by_dt_name(&self, dt_name: &str) -> Option<usize> {
        self.by_dt_name.get(dt_name).copied()
    }

    /// Bits used to encode a class id in entity data.
    pub fn class_bits(&self) -> usize {
        self.class_bits
    }

    /// Decodes the DataTables region: send tables, then the class list, then
    /// flattens every class.
    pub fn parse_data_tables(&mut self, r: &mut BitReader<'_>) -> Result<()> {
        let mut send_tables: HashMap<String, SendTable> = HashMap::with_capacity(SEND_TABLES_MIN);
        loop {
            let t = r.read_varint32()?;
            if t != SEND_TABLE_MESSAGE {
                return Err(ParserError::UnexpectedDataTableMessage {
                    expected: SEND_TABLE_MESSAGE,
                    got: t,
                });
            }

            let size = r.read_varint32()? as usize;
            let st = CsvcMsgSendTable::decode(r.read_bytes(size)?.as_slice())?;
            let send_table = SendTable::from(st);
            if send_table.is_end {
                break;
            }
            send_tables.insert(send_table.name.clone(), send_table);
        }

        let count = r.read_int(16)? as usize;
        let mut classes = Vec::with_capacity(count.max(SERVER_CLASSES_MIN));
        for _ in 0..count {
            let id = r.read_int(16)? as usize;
            if id >= count {
                return Err(ParserError::InvalidClassId { id, count });
            }
            let name = r.read_string()?;
            let dt_name = r.read_string()?;
            classes.push(ServerClass {
                id,
                name,
                dt_name,
                ..Default::default()
            });
        }

        self.classes = classes;
        self.reindex();
        for i in 0..self.classes.len() {
            self.flatten_class(i, &send_tables)?;
        }
        self.preprocessed_baselines.clear();

        debug!(
            "decoded {} send tables and {} server classes ({} class bits)",
            send_tables.len(),
            count,
            self.class_bits
        );
        Ok(())
    }

    fn flatten_class(&mut self, index: usize, send_tables: &HashMap<String, SendTable>) -> Result<()> {
        let table = lookup_table(send_tables, &self.classes[index].dt_name)?;

        let mut excludes = HashSet::new();
        let mut base_classes = Vec::new();
        self.gather_prerequisites(table, true, send_tables, &mut excludes, &mut base_classes)?;

        let mut props = Vec::with_capacity(FLATTENED_PROPS_CAP);
        gather_props(table, "", send_tables, &excludes, &mut props)?;
        sort_by_priority(&mut props);

        let class = &mut self.classes[index];
        class.prop_name_to_idx = props
            .iter()
            .enumerate()
            .map(|(i, fp)| (fp.name.clone(), i))
            .collect();
        class.flattened_props = props;
        class.base_classes = base_classes;

        trace!(
            "flattened {} into {} props",
            class.name,
            class.flattened_props.len()
        );
        Ok(())
    }

    fn gather_prerequisites(
        &self,
        table: &SendTable,
        collect_base_classes: bool,
        send_tables: &HashMap<String, SendTable>,
        excludes: &mut HashSet<(String, String)>,
        base_classes: &mut Vec<usize>,
    ) -> Result<()> {
        for prop in table.properties.iter() {
            if prop.flags.has_flag_set(PROP_FLAG_EXCLUDE) {
                excludes.insert((prop.dt_name.clone(), prop.name.clone()));
            }
        }

        for prop in table.properties.iter().filter(|p| p.is_data_table()) {
            let sub_table = lookup_table(send_tables, &prop.dt_name)?;
            let is_base_class = collect_base_classes && prop.name == BASE_CLASS_PROP;
            self.gather_prerequisites(sub_table, is_base_class, send_tables, excludes, base_classes)?;

            if is_base_class {
                match self.find_by_dt_name(&prop.dt_name) {
                    Some(base) => base_classes.push(base),
                    None => trace!("no server class for base table {}", prop.dt_name),
                }
            }
        }
        Ok(())
    }

    /// Stores a raw baseline and drops any decoded copy of the previous one.
    pub fn set_instance_baseline(&mut self, class_id: usize, data: Vec<u8>) {
        self.preprocessed_baselines.remove(&class_id);
        self.instance_baselines.insert(class_id, data);
    }

    /// Decodes the instance baseline of a class once and caches it.
    pub fn prepare_baseline(&mut self, class_id: usize) -> Result<()> {
        if self.preprocessed_baselines.contains_key(&class_id) {
            return Ok(());
        }

        let class = self.get(class_id)?;
        let values = match self.instance_baselines.get(&class_id) {
            Some(data) => decode_baseline(&class.name, &class.flattened_props, data)?,
            None => Vec::new(),
        };
        self.preprocessed_baselines.insert(class_id, values);
        Ok(())
    }

    /// The decoded baseline of a class; empty until [`Self::prepare_baseline`] ran.
    pub fn baseline(&self, class_id: usize) -> &[(usize, PropertyValue)] {
        self.preprocessed_baselines
            .get(&class_id)
            .map_or(&[], Vec::as_slice)
    }
}

fn lookup_table<'a>(
    send_tables: &'a HashMap<String, SendTable>,
    name: &str,
) -> Result<&'a SendTable> {
    send_tables
        .get(name)
        .ok_or_else(|| ParserError::UnknownSendTable(name.to_string()))
}

/// Props of non-collapsible sub-tables land ahead of the table's own props.
fn gather_props(
    table: &SendTable,
    prefix: &str,
    send_tables: &HashMap<String, SendTable>,
    excludes: &HashSet<(String, String)>,
    props: &mut Vec<FlattenedPropEntry>,
) -> Result<()> {
    let mut tmp = Vec::new();
    gather_props_iterate(table, prefix, send_tables, excludes, props, &mut tmp)?;
    props.append(&mut tmp);
    Ok(())
}

fn gather_props_iterate(
    table: &SendTable,
    prefix: &str,
    send_tables: &HashMap<String, SendTable>,
    excludes: &HashSet<(String, String)>,
    props: &mut Vec<FlattenedPropEntry>,
    tmp: &mut Vec<FlattenedPropEntry>,
) -> Result<()> {
    for (i, prop) in table.properties.iter().enumerate() {
        if prop.flags.has_flag_set(PROP_FLAG_INSIDE_ARRAY)
            || prop.flags.has_flag_set(PROP_FLAG_EXCLUDE)
            || excludes.contains(&(table.name.clone(), prop.name.clone()))
        {
            continue;
        }

        if prop.is_data_table() {
            let sub_table = lookup_table(send_tables, &prop.dt_name)?;
            if prop.flags.has_flag_set(PROP_FLAG_COLLAPSIBLE) {
                gather_props_iterate(sub_table, prefix, send_tables, excludes, props, tmp)?;
            } else {
                let mut n_fix = prefix.to_string();
                if !prop.name.is_empty() {
                    n_fix.push_str(&prop.name);
                    n_fix.push('.');
                }
                gather_props(sub_table, &n_fix, send_tables, excludes, props)?;
            }
        } else {
            let array_elem_prop = if prop.raw_type == SendPropType::Array as i32 {
                i.checked_sub(1).map(|prev| table.properties[prev].clone())
            } else {
                None
            };
            tmp.push(FlattenedPropEntry {
                name: format!("{prefix}{}", prop.name),
                prop: prop.clone(),
                array_elem_prop,
            });
        }
    }
    Ok(())
}

fn sort_by_priority(props: &mut [FlattenedPropEntry]) {
    let mut prios: Vec<i32> = props.iter().map(|fp| fp.prop.priority).collect();
    prios.push(CHANGES_OFTEN_PRIORITY);
    prios.sort_unstable();
    prios.dedup();

    let mut start = 0;
    for prio in prios {
        loop {
            let mut cp = start;
            while cp < props.len() {
                let prop = &props[cp].prop;
                if prop.priority == prio
                    || (prio == CHANGES_OFTEN_PRIORITY
                        && prop.flags.has_flag_set(PROP_FLAG_CHANGES_OFTEN))
                {
                    props.swap(start, cp);
                    start += 1;
                    break;
                }
                cp += 1;
            }

            if cp == props.len() {
                break;
            }
        }
    }
}
