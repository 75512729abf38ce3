use serde::{Deserialize, Serialize};

use crate::io::pandapower::Network;

/// The element types that own a slot in the topology vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    Load,
    Gen,
    LineOr,
    LineEx,
}

/// Which column of which pandapower table a topology slot writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopoKind {
    Load,
    Gen,
    LineOr,
    TrafoHv,
    LineEx,
    TrafoLv,
}

impl TopoKind {
    pub fn table(&self) -> &'static str {
        match self {
            TopoKind::Load => "load",
            TopoKind::Gen => "gen",
            TopoKind::LineOr | TopoKind::LineEx => "line",
            TopoKind::TrafoHv | TopoKind::TrafoLv => "trafo",
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            TopoKind::Load | TopoKind::Gen => "bus",
            TopoKind::LineOr => "from_bus",
            TopoKind::LineEx => "to_bus",
            TopoKind::TrafoHv => "hv_bus",
            TopoKind::TrafoLv => "lv_bus",
        }
    }
}

/// Backend side of a topology slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopoSlot {
    /// Index among the elements of the same kind (lines and transformers share one range).
    pub element: usize,
    /// Row in the pandapower table named by `kind`.
    pub row: usize,
    pub kind: TopoKind,
    /// Home substation.
    pub sub: usize,
}

/// One entry of the per-substation object placement table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectPlacement {
    pub table: &'static str,
    pub column: &'static str,
    pub row: usize,
}

/// Static index tables of a loaded grid.
///
/// Built once, before the bus table is doubled. Lines come first, then
/// transformers, in every per-branch vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridLayout {
    pub n_sub: usize,
    pub n_line: usize,
    /// Rows of the pandapower line table, transformers start after them.
    pub n_line_pp: usize,
    pub n_gen: usize,
    pub n_load: usize,
    pub n_shunt: usize,
    pub dim_topo: usize,

    pub sub_info: Vec<usize>,

    pub load_to_subid: Vec<usize>,
    pub gen_to_subid: Vec<usize>,
    pub line_or_to_subid: Vec<usize>,
    pub line_ex_to_subid: Vec<usize>,
    pub shunt_to_subid: Vec<usize>,

    pub load_to_sub_pos: Vec<usize>,
    pub gen_to_sub_pos: Vec<usize>,
    pub line_or_to_sub_pos: Vec<usize>,
    pub line_ex_to_sub_pos: Vec<usize>,

    pub load_pos_topo_vect: Vec<usize>,
    pub gen_pos_topo_vect: Vec<usize>,
    pub line_or_pos_topo_vect: Vec<usize>,
    pub line_ex_pos_topo_vect: Vec<usize>,

    pub what_object_where: Vec<Vec<ObjectPlacement>>,
    /// slot -> (element index, element kind)
    pub big_topo_to_obj: Vec<(usize, ElementKind)>,
    /// slot -> backend row and dispatch kind
    pub big_topo_to_backend: Vec<TopoSlot>,

    pub name_load: Vec<String>,
    pub name_gen: Vec<String>,
    pub name_line: Vec<String>,
    pub name_sub: Vec<String>,
    pub name_shunt: Vec<String>,

    pub load_pu_to_kv: Vec<f64>,
    pub prod_pu_to_kv: Vec<f64>,
    pub lines_or_pu_to_kv: Vec<f64>,
    pub lines_ex_pu_to_kv: Vec<f64>,
    pub shunt_pu_to_kv: Vec<f64>,

    pub thermal_limit_a: Vec<f64>,
}

/// Uses the `name` column when every row has one, otherwise the generated names.
fn names_or<'a>(
    given: impl Iterator<Item = &'a Option<String>>,
    generated: impl Iterator<Item = String>,
) -> Vec<String> {
    let given: Option<Vec<String>> = given.cloned().collect();
    given.unwrap_or_else(|| generated.collect())
}

impl GridLayout {
    /// Builds the index tables from validated tables whose bus rows are the substations.
    pub fn build(net: &Network) -> Self {
        let n_sub = net.bus.len();
        let n_line_pp = net.line.len();
        let n_line = n_line_pp + net.trafo.len();
        let sub = |b: i64| b as usize;

        let mut sub_info = vec![0usize; n_sub];
        let mut what_object_where = vec![Vec::new(); n_sub];
        let mut place = |s: usize, table: &'static str, column: &'static str, row: usize| {
            let pos = sub_info[s];
            sub_info[s] += 1;
            what_object_where[s].push(ObjectPlacement { table, column, row });
            pos
        };

        let mut line_or_to_subid = Vec::with_capacity(n_line);
        let mut line_ex_to_subid = Vec::with_capacity(n_line);
        let mut line_or_to_sub_pos = Vec::with_capacity(n_line);
        let mut line_ex_to_sub_pos = Vec::with_capacity(n_line);
        for (i, l) in net.line.iter().enumerate() {
            let (or, ex) = (sub(l.from_bus), sub(l.to_bus));
            line_or_to_subid.push(or);
            line_ex_to_subid.push(ex);
            line_or_to_sub_pos.push(place(or, "line", "from_bus", i));
            line_ex_to_sub_pos.push(place(ex, "line", "to_bus", i));
        }
        for (i, t) in net.trafo.iter().enumerate() {
            let (or, ex) = (sub(t.hv_bus), sub(t.lv_bus));
            line_or_to_subid.push(or);
            line_ex_to_subid.push(ex);
            line_or_to_sub_pos.push(place(or, "trafo", "hv_bus", i));
            line_ex_to_sub_pos.push(place(ex, "trafo", "lv_bus", i));
        }
        let mut gen_to_subid = Vec::with_capacity(net.r#gen.len());
        let mut gen_to_sub_pos = Vec::with_capacity(net.r#gen.len());
        for (i, g) in net.r#gen.iter().enumerate() {
            gen_to_subid.push(sub(g.bus));
            gen_to_sub_pos.push(place(sub(g.bus), "gen", "bus", i));
        }
        let mut load_to_subid = Vec::with_capacity(net.load.len());
        let mut load_to_sub_pos = Vec::with_capacity(net.load.len());
        for (i, l) in net.load.iter().enumerate() {
            load_to_subid.push(sub(l.bus));
            load_to_sub_pos.push(place(sub(l.bus), "load", "bus", i));
        }
        let shunt_to_subid: Vec<usize> = net.shunt.iter().map(|s| sub(s.bus)).collect();

        let mut offset = vec![0usize; n_sub];
        for s in 1..n_sub {
            offset[s] = offset[s - 1] + sub_info[s - 1];
        }
        let dim_topo = sub_info.iter().sum();
        let pos = |subid: &[usize], sub_pos: &[usize]| -> Vec<usize> {
            subid
                .iter()
                .zip(sub_pos)
                .map(|(&s, &p)| offset[s] + p)
                .collect()
        };
        let load_pos_topo_vect = pos(&load_to_subid, &load_to_sub_pos);
        let gen_pos_topo_vect = pos(&gen_to_subid, &gen_to_sub_pos);
        let line_or_pos_topo_vect = pos(&line_or_to_subid, &line_or_to_sub_pos);
        let line_ex_pos_topo_vect = pos(&line_ex_to_subid, &line_ex_to_sub_pos);

        let placeholder = TopoSlot {
            element: 0,
            row: 0,
            kind: TopoKind::Load,
            sub: 0,
        };
        let mut big_topo_to_obj = vec![(0, ElementKind::Load); dim_topo];
        let mut big_topo_to_backend = vec![placeholder; dim_topo];
        let mut fill = |slots: &[usize], subs: &[usize], obj: ElementKind, kinds: (TopoKind, TopoKind)| {
            for (element, (&slot, &s)) in slots.iter().zip(subs).enumerate() {
                let (kind, row) = if element < n_line_pp || !matches!(obj, ElementKind::LineOr | ElementKind::LineEx) {
                    (kinds.0, element)
                } else {
                    (kinds.1, element - n_line_pp)
                };
                big_topo_to_obj[slot] = (element, obj);
                big_topo_to_backend[slot] = TopoSlot {
                    element,
                    row,
                    kind,
                    sub: s,
                };
            }
        };
        fill(
            &load_pos_topo_vect,
            &load_to_subid,
            ElementKind::Load,
            (TopoKind::Load, TopoKind::Load),
        );
        fill(
            &gen_pos_topo_vect,
            &gen_to_subid,
            ElementKind::Gen,
            (TopoKind::Gen, TopoKind::Gen),
        );
        fill(
            &line_or_pos_topo_vect,
            &line_or_to_subid,
            ElementKind::LineOr,
            (TopoKind::LineOr, TopoKind::TrafoHv),
        );
        fill(
            &line_ex_pos_topo_vect,
            &line_ex_to_subid,
            ElementKind::LineEx,
            (TopoKind::LineEx, TopoKind::TrafoLv),
        );

        let mut name_line = names_or(
            net.line.iter().map(|l| &l.name),
            net.line
                .iter()
                .enumerate()
                .map(|(i, l)| format!("{}_{}_{}", l.from_bus, l.to_bus, i)),
        );
        name_line.extend(names_or(
            net.trafo.iter().map(|t| &t.name),
            net.trafo.iter().enumerate().map(|(i, t)| {
                // buses are sorted as text
                let mut ends = [t.hv_bus.to_string(), t.lv_bus.to_string()];
                ends.sort();
                format!("{}_{}_{}", ends[0], ends[1], i + n_line_pp)
            }),
        ));
        let name_gen = names_or(
            net.r#gen.iter().map(|g| &g.name),
            net.r#gen
                .iter()
                .enumerate()
                .map(|(i, g)| format!("gen_{}_{}", g.bus, i)),
        );
        let name_load = names_or(
            net.load.iter().map(|l| &l.name),
            net.load
                .iter()
                .enumerate()
                .map(|(i, l)| format!("load_{}_{}", l.bus, i)),
        );
        let name_sub = (0..n_sub).map(|i| format!("sub_{i}")).collect();
        let name_shunt = net
            .shunt
            .iter()
            .enumerate()
            .map(|(i, s)| format!("shunt_{}_{}", s.bus, i))
            .collect();

        let vn = |subs: &[usize]| -> Vec<f64> { subs.iter().map(|&s| net.bus[s].vn_kv).collect() };
        let thermal_limit_a = net
            .line
            .iter()
            .map(|l| 1000.0 * l.max_i_ka)
            .chain(
                net.trafo
                    .iter()
                    .map(|t| 1000.0 * t.sn_mva / (3f64.sqrt() * t.vn_hv_kv)),
            )
            .collect();

        Self {
            n_sub,
            n_line,
            n_line_pp,
            n_gen: net.r#gen.len(),
            n_load: net.load.len(),
            n_shunt: net.shunt.len(),
            dim_topo,
            sub_info,
            load_pu_to_kv: vn(&load_to_subid),
            prod_pu_to_kv: vn(&gen_to_subid),
            lines_or_pu_to_kv: vn(&line_or_to_subid),
            lines_ex_pu_to_kv: vn(&line_ex_to_subid),
            shunt_pu_to_kv: vn(&shunt_to_subid),
            load_to_subid,
            gen_to_subid,
            line_or_to_subid,
            line_ex_to_subid,
            shunt_to_subid,
            load_to_sub_pos,
            gen_to_sub_pos,
            line_or_to_sub_pos,
            line_ex_to_sub_pos,
            load_pos_topo_vect,
            gen_pos_topo_vect,
            line_or_pos_topo_vect,
            line_ex_pos_topo_vect,
            what_object_where,
            big_topo_to_obj,
            big_topo_to_backend,
            name_load,
            name_gen,
            name_line,
            name_sub,
            name_shunt,
            thermal_limit_a,
        }
    }

    /// Element index and kind of a topology slot.
    pub fn convert_id_topo(&self, slot: usize) -> Option<(usize, ElementKind)> {
        self.big_topo_to_obj.get(slot).copied()
    }

    /// Position of an element of `kind` in the topology vector.
    pub fn pos_topo_vect(&self, kind: ElementKind, element: usize) -> usize {
        match kind {
            ElementKind::Load => self.load_pos_topo_vect[element],
            ElementKind::Gen => self.gen_pos_topo_vect[element],
            ElementKind::LineOr => self.line_or_pos_topo_vect[element],
            ElementKind::LineEx => self.line_ex_pos_topo_vect[element],
        }
    }
}
