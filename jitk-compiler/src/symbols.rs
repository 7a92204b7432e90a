//! Symbol table of a kernel and per loop naming scopes

use crate::block::{Block, BlockId, LoopB};
use alloc::{
    collections::{BTreeMap, BTreeSet},
    format,
    string::String,
    vec::Vec,
};
use core::fmt::{Display, Formatter, Write};
use jitk_core::{
    base::BaseId, chasher::hash_str, constant::Constant, dtype::DType, instruction::Instruction, opcode::Opcode,
    view::View,
};

/// What is passed to kernels as variables instead of being written into the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolConfig {
    /// Offsets and strides of views are kernel parameters
    pub strides_as_var: bool,
    /// Array indices are computed once per loop body into index variables
    pub index_as_var: bool,
    /// Constants are kernel parameters
    pub const_as_var: bool,
    /// Temporary arrays are kernel parameters instead of being allocated by the kernel
    pub temps_as_params: bool,
}

impl Default for SymbolConfig {
    fn default() -> Self {
        SymbolConfig {
            strides_as_var: true,
            index_as_var: true,
            const_as_var: true,
            temps_as_params: false,
        }
    }
}

#[derive(Debug)]
struct TempUse {
    block: BlockId,
    view: View,
    scalar: bool,
}

/// Symbols of one kernel
#[derive(Debug)]
pub struct SymbolTable {
    /// Configuration the table was built with
    pub config: SymbolConfig,
    base_ids: BTreeMap<BaseId, usize>,
    base_order: Vec<BaseId>,
    dtypes: BTreeMap<BaseId, DType>,
    // Lowest accessed element and highest plus one
    extents: BTreeMap<BaseId, (i64, i64)>,
    params: Vec<BaseId>,
    array_temps: Vec<BaseId>,
    scalar_temps: BTreeMap<BaseId, BlockId>,
    view_ids: BTreeMap<View, usize>,
    offset_strides: Vec<View>,
    const_ids: BTreeMap<Constant, usize>,
    constants: Vec<Constant>,
    use_random: bool,
    codegen_hash: u64,
}

fn visit_instr<'a>(l: &'a LoopB, f: &mut impl FnMut(&'a LoopB, &'a Instruction)) {
    for b in &l.block_list {
        match b {
            Block::Loop(sub) => visit_instr(sub, f),
            Block::Instr { instr, .. } => f(l, instr),
        }
    }
}


impl SymbolTable {
    /// Collect symbols of kernel
    pub fn new(kernel: &LoopB, config: SymbolConfig) -> SymbolTable {
        let mut table = SymbolTable {
            config,
            base_ids: BTreeMap::new(),
            base_order: Vec::new(),
            dtypes: BTreeMap::new(),
            extents: BTreeMap::new(),
            params: Vec::new(),
            array_temps: Vec::new(),
            scalar_temps: BTreeMap::new(),
            view_ids: BTreeMap::new(),
            offset_strides: Vec::new(),
            const_ids: BTreeMap::new(),
            constants: Vec::new(),
            use_random: false,
            codegen_hash: 0,
        };
        let temps = kernel.all_temps();
        let mut temp_uses: BTreeMap<BaseId, TempUse> = BTreeMap::new();

        visit_instr(kernel, &mut |l, instr| {
            if instr.opcode == Opcode::Random {
                table.use_random = true;
            }
            if let Some(c) = instr.constant {
                if !instr.opcode.is_sweep() && !table.const_ids.contains_key(&c) {
                    table.const_ids.insert(c, table.constants.len());
                    table.constants.push(c);
                }
            }
            let pointers = instr.pointer_bases();
            for (i, v) in instr.operand.iter().enumerate() {
                let Some(base) = v.base else { continue };
                if !table.base_ids.contains_key(&base) {
                    table.base_ids.insert(base, table.base_order.len());
                    table.base_order.push(base);
                    table.dtypes.insert(base, v.dtype);
                }
                if v.nelements() > 0 {
                    let (lo, hi) = v.extent();
                    let range = table.extents.entry(base).or_insert((lo, hi + 1));
                    *range = (range.0.min(lo), range.1.max(hi + 1));
                }
                if !table.view_ids.contains_key(v) {
                    table.view_ids.insert(v.clone(), table.view_ids.len());
                }
                if temps.contains(&base) {
                    let scalar = !(instr.indirect_operand(i) || (i == 0 && instr.opcode.is_sweep()) || pointers.contains(&base));
                    temp_uses
                        .entry(base)
                        .and_modify(|u| {
                            u.scalar &= scalar && u.block == l.id && u.view == *v;
                        })
                        .or_insert(TempUse { block: l.id, view: v.clone(), scalar });
                }
            }
        });

        for (base, u) in &temp_uses {
            if u.scalar {
                table.scalar_temps.insert(*base, u.block);
            }
        }
        for base in &table.base_order {
            if !temps.contains(base) {
                table.params.push(*base);
            } else if !table.scalar_temps.contains_key(base) {
                if config.temps_as_params {
                    table.params.push(*base);
                } else {
                    table.array_temps.push(*base);
                }
            }
        }
        if config.strides_as_var {
            let mut views: Vec<(&View, usize)> = table
                .view_ids
                .iter()
                .filter(|(v, _)| v.base.is_some_and(|b| !table.scalar_temps.contains_key(&b)))
                .map(|(v, id)| (v, *id))
                .collect();
            views.sort_by_key(|(_, id)| *id);
            table.offset_strides = views.into_iter().map(|(v, _)| v.clone()).collect();
        }
        let mut structure = String::new();
        table.write_structure(kernel, &mut structure);
        table.codegen_hash = hash_str(&structure);
        table
    }

    fn write_structure(&self, l: &LoopB, out: &mut String) {
        let _ = writeln!(out, "L{} {} {}", l.rank, l.size, l.sweeps.len());
        for b in &l.block_list {
            match b {
                Block::Loop(sub) => self.write_structure(sub, out),
                Block::Instr { instr, .. } => {
                    let _ = write!(out, "{}", instr.opcode);
                    if let Some(axis) = instr.sweep_axis() {
                        let _ = write!(out, "({axis})");
                    }
                    for v in &instr.operand {
                        match v.base {
                            None => match instr.constant {
                                Some(c) if self.config.const_as_var && !instr.opcode.is_sweep() => {
                                    let _ = write!(out, " c{}:{}", self.const_ids[&c], c.dtype());
                                }
                                Some(c) => {
                                    let _ = write!(out, " {c}");
                                }
                                None => {}
                            },
                            Some(base) => {
                                let _ = write!(out, " a{}:{}", self.base_ids[&base], v.dtype);
                                if self.config.strides_as_var {
                                    let _ = write!(out, "v{}{:?}", self.view_ids[v], v.shape);
                                } else {
                                    let _ = write!(out, "[{} {:?} {:?}]", v.start, v.shape, v.stride);
                                }
                            }
                        }
                    }
                    out.push('\n');
                }
            }
        }
    }

    /// Kernel specific id of base
    pub fn base_id(&self, base: BaseId) -> usize {
        self.base_ids.get(&base).copied().unwrap_or(usize::MAX)
    }

    /// DType of base as accessed by the kernel
    pub fn dtype(&self, base: BaseId) -> DType {
        self.dtypes.get(&base).copied().unwrap_or(DType::Bool)
    }

    /// Number of elements a kernel allocated temporary needs, highest accessed element plus one
    pub fn extent(&self, base: BaseId) -> i64 {
        self.extents.get(&base).map_or(0, |r| r.1)
    }

    /// Lowest element of base accessed by the kernel, negative offsets are out of bounds
    pub fn lowest(&self, base: BaseId) -> i64 {
        self.extents.get(&base).map_or(0, |r| r.0)
    }

    /// Bases accessed by the kernel, in order of first use
    pub fn bases(&self) -> &[BaseId] {
        &self.base_order
    }

    /// Bases passed to the kernel, in binding order
    pub fn params(&self) -> &[BaseId] {
        &self.params
    }

    /// Temporary arrays allocated within the kernel
    pub fn array_temps(&self) -> &[BaseId] {
        &self.array_temps
    }

    /// Is base replaced by a scalar
    pub fn is_scalar_temp(&self, base: BaseId) -> bool {
        self.scalar_temps.contains_key(&base)
    }

    /// Scalar temporaries declared in the body of given loop
    pub fn scalar_temps_of(&self, block: BlockId) -> Vec<BaseId> {
        self.scalar_temps.iter().filter(|(_, b)| **b == block).map(|(base, _)| *base).collect()
    }

    /// Kernel specific id of view
    pub fn view_id(&self, view: &View) -> usize {
        self.view_ids.get(view).copied().unwrap_or(usize::MAX)
    }

    /// Views whose offset and strides are kernel parameters
    pub fn offset_strides(&self) -> &[View] {
        &self.offset_strides
    }

    /// Is offset and stride of view a kernel parameter
    pub fn has_offset_strides(&self, view: &View) -> bool {
        self.config.strides_as_var && view.base.is_some_and(|b| !self.is_scalar_temp(b))
    }

    /// Constants passed to the kernel
    pub fn constants(&self) -> &[Constant] {
        &self.constants
    }

    /// Kernel specific id of constant
    pub fn const_id(&self, c: &Constant) -> usize {
        self.const_ids.get(c).copied().unwrap_or(usize::MAX)
    }

    /// Does the kernel use the random123 generator
    pub fn use_random(&self) -> bool {
        self.use_random
    }

    /// Hash of kernel structure, two kernels with equal hash generate equal source
    pub fn codegen_hash(&self) -> u64 {
        self.codegen_hash
    }

    /// Values of offset_strides parameters in binding order
    pub fn offset_stride_values(&self) -> Vec<i64> {
        let mut res = Vec::new();
        for v in &self.offset_strides {
            res.push(v.start);
            res.extend_from_slice(&v.stride);
        }
        res
    }
}

impl Display for SymbolTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "Symbol table (codegen hash {:x})", self.codegen_hash)?;
        for base in &self.base_order {
            let kind = if self.is_scalar_temp(*base) {
                "scalar"
            } else if self.array_temps.contains(base) {
                "temp"
            } else {
                "param"
            };
            writeln!(f, "  a{}: {base} {} {kind}", self.base_ids[base], self.dtypes[base])?;
        }
        for (i, v) in self.offset_strides.iter().enumerate() {
            writeln!(f, "  v{i}: {v}")?;
        }
        for (i, c) in self.constants.iter().enumerate() {
            writeln!(f, "  c{i}: {c}")?;
        }
        Ok(())
    }
}

/// Protection of a reduction output updated from multiple OpenMP threads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OmpProtection {
    /// `#pragma omp atomic`
    Atomic,
    /// `#pragma omp critical`
    Critical,
}

/// Names visible within one loop body
#[derive(Debug)]
pub struct Scope<'a> {
    symbols: &'a SymbolTable,
    parent: Option<&'a Scope<'a>>,
    rank: i32,
    threaded_ranks: usize,
    scalar_replaced: BTreeSet<View>,
    index_vars: BTreeMap<String, String>,
    omp_protected: BTreeMap<View, OmpProtection>,
    peeled_axis: Option<usize>,
}

impl<'a> Scope<'a> {
    /// Scope of the kernel body
    pub fn root(symbols: &'a SymbolTable, threaded_ranks: usize) -> Scope<'a> {
        Scope {
            symbols,
            parent: None,
            rank: -1,
            threaded_ranks,
            scalar_replaced: BTreeSet::new(),
            index_vars: BTreeMap::new(),
            omp_protected: BTreeMap::new(),
            peeled_axis: None,
        }
    }

    /// Scope of the body of loop with given rank
    pub fn child(&'a self, rank: i32) -> Scope<'a> {
        Scope {
            symbols: self.symbols,
            parent: Some(self),
            rank,
            threaded_ranks: self.threaded_ranks,
            scalar_replaced: BTreeSet::new(),
            index_vars: BTreeMap::new(),
            omp_protected: BTreeMap::new(),
            peeled_axis: None,
        }
    }

    /// Symbol table of the kernel
    pub fn symbols(&self) -> &'a SymbolTable {
        self.symbols
    }

    /// Rank of the loop owning this scope
    pub fn rank(&self) -> i32 {
        self.rank
    }

    /// Number of leading ranks mapped to hardware threads
    pub fn threaded_ranks(&self) -> usize {
        self.threaded_ranks
    }

    /// Output view of reduction accumulated in a scalar
    pub fn insert_scalar_replaced(&mut self, view: View) {
        self.scalar_replaced.insert(view);
    }

    /// Is view accumulated in a scalar in this scope or a parent scope
    pub fn is_scalar_replaced(&self, view: &View) -> bool {
        self.scalar_replaced.contains(view) || self.parent.is_some_and(|p| p.is_scalar_replaced(view))
    }

    /// Declare index variable holding expression, returns its name
    pub fn insert_index_var(&mut self, expr: String) -> String {
        let name = format!("idx{}_{}", self.rank.max(0), self.index_vars.len());
        self.index_vars.entry(expr).or_insert(name).clone()
    }

    /// Index variable declared in this scope for expression
    pub fn index_var(&self, expr: &str) -> Option<&str> {
        self.index_vars.get(expr).map(String::as_str)
    }

    /// Protect updates of view
    pub fn insert_omp_protected(&mut self, view: View, protection: OmpProtection) {
        self.omp_protected.insert(view, protection);
    }

    /// Protection of view updates in this scope or a parent scope
    pub fn omp_protection(&self, view: &View) -> Option<OmpProtection> {
        self.omp_protected
            .get(view)
            .copied()
            .or_else(|| self.parent.and_then(|p| p.omp_protection(view)))
    }

    /// Scope executes the first iteration of loop over axis
    pub fn set_peeled_axis(&mut self, axis: usize) {
        self.peeled_axis = Some(axis);
    }

    /// Is this scope or a parent scope the first iteration of loop over axis
    pub fn is_peeled(&self, axis: usize) -> bool {
        self.peeled_axis == Some(axis) || self.parent.is_some_and(|p| p.is_peeled(axis))
    }

    /// Is base replaced by scalar temporary
    pub fn is_scalar_temp(&self, base: BaseId) -> bool {
        self.symbols.is_scalar_temp(base)
    }
}
