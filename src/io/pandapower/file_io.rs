use csv::ReaderBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::{fs, fs::File};
use std::{io::Read, option::Option};

use serde_json::{Map, Value};

use crate::error::{BackendError, Result};

/// This module is used to parse and write pandapower network tables

fn default_true() -> bool {
    true
}

fn default_one() -> f64 {
    1.0
}

fn default_step() -> i32 {
    1
}

/// Deserializes a number from JSON format, accepting floats for integer columns.
fn from_number<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let val: Value = Deserialize::deserialize(deserializer)?;
    match val {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("invalid number format")),
        Value::String(s) => Ok(s.parse::<f64>().ok().map(|f| f as i64)),
        _ => Ok(None),
    }
}

/// Deserializes a string from JSON format, numbers are kept as their text.
fn from_str<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val: Value = Deserialize::deserialize(deserializer)?;
    match val {
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::String(s) if !s.is_empty() => Ok(Some(s)),
        _ => Ok(None),
    }
}

/// Represents a bus in the network.
#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Bus {
    #[serde(default)]
    pub index: i64,
    #[serde(default = "default_true")]
    pub in_service: bool,
    #[serde(default)]
    pub max_vm_pu: Option<f64>,
    #[serde(default)]
    pub min_vm_pu: Option<f64>,
    #[serde(default, deserialize_with = "from_str")]
    pub name: Option<String>,
    #[serde(rename = "type", default, deserialize_with = "from_str")]
    pub type_: Option<String>,
    pub vn_kv: f64,
    #[serde(default, deserialize_with = "from_number")]
    pub zone: Option<i64>,
}

/// Represents a generator in the network.
#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Gen {
    pub bus: i64,
    #[serde(default)]
    pub controllable: Option<bool>,
    #[serde(default = "default_true")]
    pub in_service: bool,
    #[serde(default, deserialize_with = "from_str")]
    pub name: Option<String>,
    pub p_mw: f64,
    #[serde(default = "default_one")]
    pub scaling: f64,
    #[serde(default)]
    pub sn_mva: Option<f64>,
    #[serde(rename = "type", default, deserialize_with = "from_str")]
    pub type_: Option<String>,
    #[serde(default = "default_one")]
    pub vm_pu: f64,
    #[serde(default)]
    pub slack: bool,
    #[serde(default)]
    pub max_p_mw: Option<f64>,
    #[serde(default)]
    pub min_p_mw: Option<f64>,
    #[serde(default)]
    pub max_q_mvar: Option<f64>,
    #[serde(default)]
    pub min_q_mvar: Option<f64>,
    #[serde(default)]
    pub slack_weight: f64,
}

/// Represents a load in the network.
#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Load {
    pub bus: i64,
    #[serde(default)]
    pub const_i_percent: f64,
    #[serde(default)]
    pub const_z_percent: f64,
    #[serde(default)]
    pub controllable: Option<bool>,
    #[serde(default = "default_true")]
    pub in_service: bool,
    #[serde(default, deserialize_with = "from_str")]
    pub name: Option<String>,
    pub p_mw: f64,
    #[serde(default)]
    pub q_mvar: f64,
    #[serde(default = "default_one")]
    pub scaling: f64,
    #[serde(default)]
    pub sn_mva: Option<f64>,
    #[serde(rename = "type", default, deserialize_with = "from_str")]
    pub type_: Option<String>,
}

/// Represents a line in the network.
#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Line {
    #[serde(default)]
    pub c_nf_per_km: f64,
    #[serde(default = "default_one")]
    pub df: f64,
    pub from_bus: i64,
    pub to_bus: i64,
    #[serde(default)]
    pub g_us_per_km: f64,
    #[serde(default = "default_true")]
    pub in_service: bool,
    pub length_km: f64,
    pub max_i_ka: f64,
    #[serde(default)]
    pub max_loading_percent: Option<f64>,
    #[serde(default = "default_step")]
    pub parallel: i32,
    pub r_ohm_per_km: f64,
    #[serde(rename = "type", default, deserialize_with = "from_str")]
    pub type_: Option<String>,
    pub x_ohm_per_km: f64,
    #[serde(default, deserialize_with = "from_str")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "from_str")]
    pub std_type: Option<String>,
}

/// Represents a two winding transformer in the network.
#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Transformer {
    #[serde(default = "default_one")]
    pub df: f64,
    pub hv_bus: i64,
    #[serde(default)]
    pub i0_percent: f64,
    #[serde(default = "default_true")]
    pub in_service: bool,
    pub lv_bus: i64,
    #[serde(default)]
    pub max_loading_percent: Option<f64>,
    #[serde(default = "default_step")]
    pub parallel: i32,
    #[serde(default)]
    pub pfe_kw: f64,
    #[serde(default)]
    pub shift_degree: f64,
    pub sn_mva: f64,
    #[serde(default)]
    pub tap_phase_shifter: bool,
    pub vn_hv_kv: f64,
    pub vn_lv_kv: f64,
    pub vk_percent: f64,
    pub vkr_percent: f64,
    #[serde(default, deserialize_with = "from_str")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "from_str")]
    pub std_type: Option<String>,
    #[serde(default, deserialize_with = "from_str")]
    pub tap_side: Option<String>,
    #[serde(default)]
    pub tap_neutral: Option<f64>,
    #[serde(default)]
    pub tap_max: Option<f64>,
    #[serde(default)]
    pub tap_pos: Option<f64>,
    #[serde(default)]
    pub tap_min: Option<f64>,
    #[serde(default)]
    pub tap_step_degree: Option<f64>,
    #[serde(default)]
    pub tap_step_percent: Option<f64>,
}

/// Represents an external grid in the network.
#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ExtGrid {
    pub bus: i64,
    #[serde(default = "default_true")]
    pub in_service: bool,
    #[serde(default)]
    pub va_degree: f64,
    #[serde(default = "default_one")]
    pub vm_pu: f64,
    #[serde(default)]
    pub max_p_mw: Option<f64>,
    #[serde(default)]
    pub min_p_mw: Option<f64>,
    #[serde(default)]
    pub max_q_mvar: Option<f64>,
    #[serde(default)]
    pub min_q_mvar: Option<f64>,
    #[serde(default = "default_one")]
    pub slack_weight: f64,
    #[serde(default, deserialize_with = "from_str")]
    pub name: Option<String>,
}

/// Represents the data from the sgen.
#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SGen {
    #[serde(default, deserialize_with = "from_str")]
    pub name: Option<String>,
    pub bus: i64,
    pub p_mw: f64,
    #[serde(default)]
    pub q_mvar: f64,
    #[serde(default)]
    pub sn_mva: Option<f64>,
    #[serde(default = "default_one")]
    pub scaling: f64,
    #[serde(default = "default_true")]
    pub in_service: bool,
    #[serde(rename = "type", default, deserialize_with = "from_str")]
    pub type_: Option<String>,
    #[serde(default)]
    pub current_source: bool,
    #[serde(default)]
    pub controllable: Option<bool>,
}

/// Represents a shunt in the network.
#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Shunt {
    pub bus: i64,
    #[serde(default)]
    pub q_mvar: f64,
    #[serde(default)]
    pub p_mw: f64,
    pub vn_kv: f64,
    #[serde(default = "default_step")]
    pub step: i32,
    #[serde(default = "default_step")]
    pub max_step: i32,
    #[serde(default = "default_true")]
    pub in_service: bool,
    #[serde(default, deserialize_with = "from_str")]
    pub name: Option<String>,
}

/// The pandapower table set the backend works on.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Network {
    #[serde(default)]
    pub r#gen: Vec<Gen>,
    pub bus: Vec<Bus>,
    #[serde(default)]
    pub load: Vec<Load>,
    #[serde(default)]
    pub line: Vec<Line>,
    #[serde(default)]
    pub trafo: Vec<Transformer>,
    #[serde(default)]
    pub shunt: Vec<Shunt>,
    #[serde(default)]
    pub ext_grid: Vec<ExtGrid>,
    #[serde(default)]
    pub sgen: Vec<SGen>,
    pub f_hz: f64,
    pub sn_mva: f64,
}

impl Default for Network {
    fn default() -> Self {
        Self {
            r#gen: Vec::new(),
            bus: Vec::new(),
            load: Vec::new(),
            line: Vec::new(),
            trafo: Vec::new(),
            shunt: Vec::new(),
            ext_grid: Vec::new(),
            sgen: Vec::new(),
            f_hz: 50.0,
            sn_mva: 1.0,
        }
    }
}

impl Network {
    /// Checks that bus indices are `0..n` and that every element refers to an existing bus.
    pub fn validate(&self) -> Result<()> {
        if self.bus.is_empty() {
            return Err(BackendError::MalformedGrid("the bus table is empty".into()));
        }
        if let Some((pos, bus)) = self
            .bus
            .iter()
            .enumerate()
            .find(|(pos, bus)| bus.index != *pos as i64)
        {
            return Err(BackendError::MalformedGrid(format!(
                "bus indices must be contiguous, found {} at position {}",
                bus.index, pos
            )));
        }
        let n_bus = self.bus.len() as i64;
        let bad = |table: &str, row: usize, bus: i64| {
            BackendError::MalformedGrid(format!("{table} {row} refers to unknown bus {bus}"))
        };
        for (i, l) in self.line.iter().enumerate() {
            for b in [l.from_bus, l.to_bus] {
                if !(0..n_bus).contains(&b) {
                    return Err(bad("line", i, b));
                }
            }
        }
        for (i, t) in self.trafo.iter().enumerate() {
            for b in [t.hv_bus, t.lv_bus] {
                if !(0..n_bus).contains(&b) {
                    return Err(bad("trafo", i, b));
                }
            }
        }
        let single = [
            ("gen", self.r#gen.iter().map(|x| x.bus).collect::<Vec<_>>()),
            ("load", self.load.iter().map(|x| x.bus).collect()),
            ("shunt", self.shunt.iter().map(|x| x.bus).collect()),
            ("ext_grid", self.ext_grid.iter().map(|x| x.bus).collect()),
            ("sgen", self.sgen.iter().map(|x| x.bus).collect()),
        ];
        for (table, buses) in single {
            if let Some((i, b)) = buses
                .into_iter()
                .enumerate()
                .find(|(_, b)| !(0..n_bus).contains(b))
            {
                return Err(bad(table, i, b));
            }
        }
        Ok(())
    }
}

/// Loads a pandapower CSV file into a vector of the specified type.
///
/// A missing file means the table is absent and yields `Ok(None)`.
fn load_pandapower_csv<T: DeserializeOwned>(name: &Path) -> Result<Option<Vec<T>>> {
    if !name.exists() {
        return Ok(None);
    }
    let file = read_csv(name)?;
    parse_csv(&file).map(Some)
}

/// Reads a CSV file and replaces "True"/"False" with "true"/"false".
fn read_csv(name: &Path) -> Result<String> {
    let mut file = File::open(name)?;
    let mut buffer = String::new();
    file.read_to_string(&mut buffer)?;
    Ok(buffer.replace("True", "true").replace("False", "false"))
}

fn parse_csv<T: DeserializeOwned>(content: &str) -> Result<Vec<T>> {
    let mut rdr = ReaderBuilder::new().from_reader(content.as_bytes());
    let headers = rdr.headers()?.to_owned();
    let mut records: Vec<T> = Vec::new();
    for record in rdr.records() {
        records.push(record?.deserialize(Some(&headers))?);
    }
    Ok(records)
}

/// Reads a CSV table from the given map and deserializes it into a vector of the specified type.
fn csv_from_map<T: DeserializeOwned>(
    map: &HashMap<String, String>,
    key: &str,
) -> Result<Option<Vec<T>>> {
    match map.get(key) {
        Some(s) => parse_csv(&s.replace("True", "true").replace("False", "false")).map(Some),
        None => Ok(None),
    }
}

/// Macro to read network data from a CSV file.
macro_rules! read_csv_network {
    ($net:ident, $map:ident, { $($field:ident: $file:expr),* $(,)? }) => {
        $(
            $net.$field = csv_from_map(&$map, $file)?.unwrap_or_default();
        )*
    };
}

/// Macro to read network data from a CSV file in a folder.
macro_rules! read_csv_network_folder {
    ($net:ident, $folder:ident, { $($field:ident: $file:expr),* $(,)? }) => {
        $(
            $net.$field = load_pandapower_csv(&$folder.join($file))?.unwrap_or_default();
        )*
    };
}

/// Macro to read network data from a json key.
macro_rules! read_json_network {
    ($net:ident, $map:ident, { $($field:ident: $file:expr),* $(,)? }) => {
        $(
            $net.$field = load_pandapower_element_json(&$map, $file)?.unwrap_or_default();
        )*
    };
}

/// Loads a CSV folder into a Network structure.
pub fn load_csv_folder(folder: impl AsRef<Path>) -> Result<Network> {
    let folder = folder.as_ref();
    let mut net = Network::default();
    net.bus = load_pandapower_csv(&folder.join("bus.csv"))?
        .ok_or_else(|| BackendError::MalformedGrid("bus.csv is missing".into()))?;
    read_csv_network_folder!(net, folder, {
        r#gen: "gen.csv",
        line: "line.csv",
        shunt: "shunt.csv",
        trafo: "trafo.csv",
        ext_grid: "ext_grid.csv",
        load: "load.csv",
        sgen: "sgen.csv",
    });
    Ok(net)
}

/// Loads a network from a ZIP file containing CSV files.
pub fn load_csv_zip(name: impl AsRef<Path>) -> Result<Network> {
    let f = File::open(name)?;
    let mut zip = zip::ZipArchive::new(f)?;
    let mut map = HashMap::new();
    for i in 0..zip.len() {
        let mut file = zip.by_index(i)?;
        if file.is_file() {
            let mut s = String::with_capacity(file.size() as usize);
            file.read_to_string(&mut s)?;
            let key = Path::new(file.name())
                .file_name()
                .map(|x| x.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.name().to_owned());
            map.insert(key, s);
        }
    }

    let mut net = Network::default();
    net.bus = csv_from_map(&map, "bus.csv")?
        .ok_or_else(|| BackendError::MalformedGrid("bus.csv is missing".into()))?;
    read_csv_network!(net, map, {
        r#gen: "gen.csv",
        line: "line.csv",
        shunt: "shunt.csv",
        trafo: "trafo.csv",
        ext_grid: "ext_grid.csv",
        load: "load.csv",
        sgen: "sgen.csv",
    });
    Ok(net)
}

fn load_json_from_str(file_content: &str) -> Result<Map<String, Value>> {
    let parsed: Value = serde_json::from_str(file_content)?;
    match parsed {
        Value::Object(obj) => Ok(obj),
        _ => Err(BackendError::MalformedGrid(
            "expected a json object".into(),
        )),
    }
}

/// Reads one pandapower DataFrame (pandas "split" orient) into records.
fn load_pandapower_element_json<T: DeserializeOwned>(
    object: &Map<String, Value>,
    key: &str,
) -> Result<Option<Vec<T>>> {
    let Some(element) = object
        .get(key)
        .and_then(|v| v.as_object())
        .and_then(|v| v.get("_object"))
    else {
        return Ok(None);
    };
    let frame = match element {
        Value::String(s) => load_json_from_str(s)?,
        Value::Object(obj) => obj.clone(),
        _ => {
            return Err(BackendError::MalformedGrid(format!(
                "table {key} is not a DataFrame"
            )));
        }
    };
    let malformed = |what: &str| BackendError::MalformedGrid(format!("table {key}: {what}"));

    let headers = frame
        .get("columns")
        .and_then(|v| v.as_array())
        .ok_or_else(|| malformed("missing columns"))?;
    let rows = frame
        .get("data")
        .and_then(|v| v.as_array())
        .ok_or_else(|| malformed("missing data"))?;
    let index = frame.get("index").and_then(|v| v.as_array());

    let mut elements = Vec::with_capacity(rows.len());
    for (pos, row) in rows.iter().enumerate() {
        let row = row.as_array().ok_or_else(|| malformed("row is not an array"))?;
        let mut obj = Map::new();
        for (k, v) in headers.iter().zip(row.iter()) {
            let k = k.as_str().ok_or_else(|| malformed("column name"))?;
            obj.insert(k.to_string(), v.clone());
        }
        let idx = index
            .and_then(|ix| ix.get(pos))
            .and_then(|v| v.as_i64())
            .unwrap_or(pos as i64);
        obj.insert("index".to_string(), Value::from(idx));

        elements.push(serde_json::from_value(Value::Object(obj))?);
    }

    Ok(Some(elements))
}

/// Parses the content of a pandapower json file.
pub fn pandapower_json_from_str(content: &str) -> Result<Network> {
    let map = load_json_from_str(content)?;
    let object = map
        .get("_object")
        .and_then(|v| v.as_object())
        .ok_or_else(|| BackendError::MalformedGrid("missing pandapowerNet _object".into()))?;

    let mut net = Network::default();
    net.bus = load_pandapower_element_json(object, "bus")?
        .ok_or_else(|| BackendError::MalformedGrid("missing bus table".into()))?;
    read_json_network!(net, object, {
        r#gen: "gen",
        line: "line",
        shunt: "shunt",
        trafo: "trafo",
        ext_grid: "ext_grid",
        load: "load",
        sgen: "sgen",
    });
    if let Some(f) = object.get("f_hz").and_then(|v| v.as_f64()) {
        net.f_hz = f;
    }
    if let Some(s) = object.get("sn_mva").and_then(|v| v.as_f64()) {
        net.sn_mva = s;
    }
    Ok(net)
}

/// Loads a pandapower json file.
pub fn load_pandapower_json(file_path: impl AsRef<Path>) -> Result<Network> {
    let content = fs::read_to_string(file_path)?;
    pandapower_json_from_str(&content)
}

/// Loads a network from a pandapower json file, a CSV zip or a CSV folder.
pub fn load_network(path: impl AsRef<Path>) -> Result<Network> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(BackendError::GridNotFound(path.to_path_buf()));
    }
    if path.is_dir() {
        return load_csv_folder(path);
    }
    match path.extension().and_then(|e| e.to_str()) {
        Some("zip") => load_csv_zip(path),
        _ => load_pandapower_json(path),
    }
}

/// Serializes a table into a pandas "split" DataFrame object.
fn element_to_json<T: Serialize + Default>(records: &[T]) -> Result<Value> {
    let template = serde_json::to_value(T::default())?;
    let columns: Vec<String> = match &template {
        Value::Object(obj) => obj.keys().cloned().collect(),
        _ => Vec::new(),
    };
    let mut data = Vec::with_capacity(records.len());
    for record in records {
        let Value::Object(obj) = serde_json::to_value(record)? else {
            continue;
        };
        let row: Vec<Value> = columns
            .iter()
            .map(|c| obj.get(c).cloned().unwrap_or(Value::Null))
            .collect();
        data.push(Value::Array(row));
    }
    let frame = serde_json::json!({
        "columns": columns,
        "index": (0..records.len()).collect::<Vec<_>>(),
        "data": data,
    });
    Ok(serde_json::json!({
        "_module": "pandas.core.frame",
        "_class": "DataFrame",
        "_object": frame.to_string(),
        "orient": "split",
    }))
}

/// Renders a network into the pandapower json layout read by [`load_pandapower_json`].
pub fn pandapower_json_to_string(net: &Network) -> Result<String> {
    let mut object = Map::new();
    object.insert("bus".into(), element_to_json(&net.bus)?);
    object.insert("gen".into(), element_to_json(&net.r#gen)?);
    object.insert("load".into(), element_to_json(&net.load)?);
    object.insert("line".into(), element_to_json(&net.line)?);
    object.insert("trafo".into(), element_to_json(&net.trafo)?);
    object.insert("shunt".into(), element_to_json(&net.shunt)?);
    object.insert("ext_grid".into(), element_to_json(&net.ext_grid)?);
    object.insert("sgen".into(), element_to_json(&net.sgen)?);
    object.insert("f_hz".into(), Value::from(net.f_hz));
    object.insert("sn_mva".into(), Value::from(net.sn_mva));
    let root = serde_json::json!({
        "_module": "pandapower.auxiliary",
        "_class": "pandapowerNet",
        "_object": Value::Object(object),
    });
    Ok(serde_json::to_string_pretty(&root)?)
}

/// Saves a network as pandapower json.
pub fn save_pandapower_json(net: &Network, path: impl AsRef<Path>) -> Result<()> {
    fs::write(path, pandapower_json_to_string(net)?)?;
    Ok(())
}
