//! Flat-double serialization for machine-boundary transfer.
//!
//! A [`SerialData`] is a length-prefixed vector of doubles: element 0
//! holds the payload length, the payload follows. Integer fields are
//! stored as doubles; every value round-trips exactly because indices
//! and counts are bounded by the problem size, far inside the 2^53
//! window.
//!
//! The `VariableSet` payload leads with the canonical layout
//!
//! ```text
//! [ numVars | numDsc | loBs[numVars] | upBs[numVars]
//!   | dscIndices[numDsc] | sos1Groups[numDsc] ]
//! ```
//!
//! followed by an optional pseudo-cost carry block. `Node`, `Status` and
//! `Problem` use analogous flat layouts.

use sprs::{CsMat, TriMat};

use crate::error::{EngineError, EngineResult};
use crate::model::{ConstraintSet, Description, Objective, Problem, Status, VariableSet};
use crate::search::node::{BranchInfo, Direction};
use crate::search::Node;

/// A length-prefixed vector of doubles.
#[derive(Debug, Clone, PartialEq)]
pub struct SerialData {
    data: Vec<f64>,
}

impl Default for SerialData {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialData {
    /// An empty archive (length prefix only).
    pub fn new() -> Self {
        Self { data: vec![0.0] }
    }

    /// Wrap raw data, validating the length prefix.
    pub fn from_vec(data: Vec<f64>) -> EngineResult<Self> {
        match data.first() {
            Some(&len) if len == (data.len() - 1) as f64 => Ok(Self { data }),
            _ => Err(EngineError::Setup("malformed serial data prefix".into())),
        }
    }

    /// The raw buffer including the prefix.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// The payload without the prefix.
    pub fn payload(&self) -> &[f64] {
        &self.data[1..]
    }

    /// Payload length.
    pub fn len(&self) -> usize {
        self.data.len() - 1
    }

    /// True when only the prefix is present.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append one value.
    pub fn push(&mut self, value: f64) {
        self.data.push(value);
        self.data[0] = (self.data.len() - 1) as f64;
    }

    /// Append an index or count.
    pub fn push_usize(&mut self, value: usize) {
        self.push(value as f64);
    }

    /// Append a slice.
    pub fn extend(&mut self, values: &[f64]) {
        self.data.extend_from_slice(values);
        self.data[0] = (self.data.len() - 1) as f64;
    }

    /// Sequential reader over the payload.
    pub fn reader(&self) -> SerialReader<'_> {
        SerialReader {
            payload: self.payload(),
            pos: 0,
        }
    }
}

/// Cursor over a [`SerialData`] payload.
pub struct SerialReader<'a> {
    payload: &'a [f64],
    pos: usize,
}

impl<'a> SerialReader<'a> {
    /// Next value.
    pub fn next(&mut self) -> EngineResult<f64> {
        let v = self
            .payload
            .get(self.pos)
            .copied()
            .ok_or_else(|| EngineError::Setup("serial data truncated".into()))?;
        self.pos += 1;
        Ok(v)
    }

    /// Next value as a non-negative integer.
    pub fn next_usize(&mut self) -> EngineResult<usize> {
        let v = self.next()?;
        if v < 0.0 || v.fract() != 0.0 || v > (1u64 << 53) as f64 {
            return Err(EngineError::Setup(format!(
                "expected an index, found {}",
                v
            )));
        }
        Ok(v as usize)
    }

    /// Next `n` values.
    pub fn take(&mut self, n: usize) -> EngineResult<&'a [f64]> {
        if self.pos + n > self.payload.len() {
            return Err(EngineError::Setup("serial data truncated".into()));
        }
        let slice = &self.payload[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Next `n` values as indices.
    pub fn take_usizes(&mut self, n: usize) -> EngineResult<Vec<usize>> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.next_usize()?);
        }
        Ok(out)
    }

    /// Error unless the payload was fully consumed.
    pub fn finish(&self) -> EngineResult<()> {
        if self.pos != self.payload.len() {
            return Err(EngineError::Setup("trailing serial data".into()));
        }
        Ok(())
    }
}

/// Types with a flat-double encoding.
pub trait SerialArchive: Sized {
    /// Append this value's payload.
    fn write(&self, out: &mut SerialData);

    /// Read one value from the cursor.
    fn read(reader: &mut SerialReader<'_>) -> EngineResult<Self>;

    /// Encode into a standalone archive.
    fn serialize(&self) -> SerialData {
        let mut out = SerialData::new();
        self.write(&mut out);
        out
    }

    /// Decode from a standalone archive, requiring full consumption.
    fn deserialize(data: &SerialData) -> EngineResult<Self> {
        let mut reader = data.reader();
        let value = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }
}

impl SerialArchive for VariableSet {
    fn write(&self, out: &mut SerialData) {
        let (lo, up) = self.bounds();
        out.push_usize(self.len());
        out.push_usize(self.num_discrete());
        out.extend(lo);
        out.extend(up);
        for &i in self.discrete_indices() {
            out.push_usize(i);
        }
        for &g in self.sos1_groups() {
            out.push_usize(g);
        }
        match self.pseudo_costs() {
            Some((costs, counts)) => {
                out.push(1.0);
                out.extend(costs);
                out.extend(counts);
            }
            None => out.push(0.0),
        }
    }

    fn read(reader: &mut SerialReader<'_>) -> EngineResult<Self> {
        let n = reader.next_usize()?;
        let d = reader.next_usize()?;
        let lo = reader.take(n)?.to_vec();
        let up = reader.take(n)?.to_vec();
        let discrete = reader.take_usizes(d)?;
        let sos1 = reader.take_usizes(d)?;
        let pseudo = if reader.next()? != 0.0 {
            let costs = reader.take(2 * d)?.to_vec();
            let counts = reader.take(2 * d)?.to_vec();
            Some((costs, counts))
        } else {
            None
        };
        VariableSet::from_parts(lo, up, discrete, sos1, pseudo)
    }
}

impl SerialArchive for Status {
    fn write(&self, out: &mut SerialData) {
        out.push(self.description.code() as f64);
        out.push(self.obj_lob);
        out.push(self.obj_upb);
        out.push(self.total_time);
        out.push(self.nodes_explored as f64);
    }

    fn read(reader: &mut SerialReader<'_>) -> EngineResult<Self> {
        let code = reader.next_usize()?;
        let description = Description::from_code(code as u8)
            .ok_or_else(|| EngineError::Setup(format!("unknown status code {}", code)))?;
        Ok(Status {
            description,
            obj_lob: reader.next()?,
            obj_upb: reader.next()?,
            total_time: reader.next()?,
            nodes_explored: reader.next_usize()? as u64,
        })
    }
}

impl SerialArchive for Node {
    fn write(&self, out: &mut SerialData) {
        out.push_usize(self.branch_lo.len());
        out.extend(&self.branch_lo);
        out.extend(&self.branch_up);
        out.push(self.objective);
        out.push(self.pseudo_objective);
        out.push(self.avg_frac);
        out.push_usize(self.depth as usize);
        out.push(if self.reliable { 1.0 } else { 0.0 });
        match &self.branch {
            Some(info) => {
                out.push(1.0);
                out.push_usize(info.pos);
                out.push(match info.dir {
                    Direction::Down => 0.0,
                    Direction::Up => 1.0,
                });
                out.push(info.frac_dist);
                out.push(info.parent_objective);
            }
            None => out.push(0.0),
        }
        out.push_usize(self.primal.len());
        out.extend(&self.primal);
        out.push_usize(self.dual.len());
        out.extend(&self.dual);
    }

    fn read(reader: &mut SerialReader<'_>) -> EngineResult<Self> {
        let n = reader.next_usize()?;
        let branch_lo = reader.take(n)?.to_vec();
        let branch_up = reader.take(n)?.to_vec();
        let objective = reader.next()?;
        let pseudo_objective = reader.next()?;
        let avg_frac = reader.next()?;
        let depth = reader.next_usize()? as u32;
        let reliable = reader.next()? != 0.0;
        let branch = if reader.next()? != 0.0 {
            let pos = reader.next_usize()?;
            let dir = if reader.next()? == 0.0 {
                Direction::Down
            } else {
                Direction::Up
            };
            Some(BranchInfo {
                pos,
                dir,
                frac_dist: reader.next()?,
                parent_objective: reader.next()?,
            })
        } else {
            None
        };
        let np = reader.next_usize()?;
        let primal = reader.take(np)?.to_vec();
        let nd = reader.next_usize()?;
        let dual = reader.take(nd)?.to_vec();
        Ok(Node {
            branch_lo,
            branch_up,
            objective,
            primal,
            dual,
            avg_frac,
            pseudo_objective,
            reliable,
            depth,
            branch,
        })
    }
}

/// Sparse matrices travel as `[nrows | ncols | nnz | storage | triplets]`.
fn write_csmat(mat: &CsMat<f64>, out: &mut SerialData) {
    out.push_usize(mat.rows());
    out.push_usize(mat.cols());
    out.push_usize(mat.nnz());
    out.push(if mat.is_csr() { 1.0 } else { 0.0 });
    for (&v, (r, c)) in mat.iter() {
        out.push_usize(r);
        out.push_usize(c);
        out.push(v);
    }
}

fn read_csmat(reader: &mut SerialReader<'_>) -> EngineResult<CsMat<f64>> {
    let rows = reader.next_usize()?;
    let cols = reader.next_usize()?;
    let nnz = reader.next_usize()?;
    let csr = reader.next()? != 0.0;
    let mut tri = TriMat::new((rows, cols));
    for _ in 0..nnz {
        let r = reader.next_usize()?;
        let c = reader.next_usize()?;
        let v = reader.next()?;
        if r >= rows || c >= cols {
            return Err(EngineError::Setup("matrix triplet out of range".into()));
        }
        tri.add_triplet(r, c, v);
    }
    Ok(if csr { tri.to_csr() } else { tri.to_csc() })
}

impl SerialArchive for Problem {
    fn write(&self, out: &mut SerialData) {
        match &self.objective {
            Objective::Null => out.push(0.0),
            Objective::Linear { l } => {
                out.push(1.0);
                out.push_usize(l.len());
                out.extend(l);
            }
            Objective::Quadratic { q, l } => {
                out.push(2.0);
                write_csmat(q, out);
                out.push_usize(l.len());
                out.extend(l);
            }
        }
        match &self.constraints {
            ConstraintSet::Null => out.push(0.0),
            ConstraintSet::Linear { a, lo, up } => {
                out.push(1.0);
                write_csmat(a, out);
                out.extend(lo);
                out.extend(up);
            }
        }
        self.variables.write(out);
    }

    fn read(reader: &mut SerialReader<'_>) -> EngineResult<Self> {
        let objective = match reader.next_usize()? {
            0 => Objective::Null,
            1 => {
                let n = reader.next_usize()?;
                Objective::Linear {
                    l: reader.take(n)?.to_vec(),
                }
            }
            2 => {
                let q = read_csmat(reader)?;
                let n = reader.next_usize()?;
                Objective::Quadratic {
                    q,
                    l: reader.take(n)?.to_vec(),
                }
            }
            tag => {
                return Err(EngineError::Setup(format!(
                    "unknown objective tag {}",
                    tag
                )))
            }
        };
        let constraints = match reader.next_usize()? {
            0 => ConstraintSet::Null,
            1 => {
                let a = read_csmat(reader)?;
                let m = a.rows();
                let lo = reader.take(m)?.to_vec();
                let up = reader.take(m)?.to_vec();
                ConstraintSet::Linear { a, lo, up }
            }
            tag => {
                return Err(EngineError::Setup(format!(
                    "unknown constraint tag {}",
                    tag
                )))
            }
        };
        let variables = VariableSet::read(reader)?;
        Problem::new(objective, constraints, variables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VariableSet;
    use sprs::CsMat;

    fn sample_variables() -> VariableSet {
        VariableSet::from_parts(
            vec![0.0, -1.0, 0.0],
            vec![1.0, 2.0, f64::INFINITY],
            vec![0, 1],
            vec![3, 3],
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_length_prefix_maintained() {
        let mut data = SerialData::new();
        assert_eq!(data.as_slice(), &[0.0]);
        data.push(7.0);
        data.extend(&[1.0, 2.0]);
        assert_eq!(data.as_slice(), &[3.0, 7.0, 1.0, 2.0]);
        assert!(SerialData::from_vec(vec![3.0, 7.0, 1.0, 2.0]).is_ok());
        assert!(SerialData::from_vec(vec![9.0, 7.0]).is_err());
    }

    #[test]
    fn test_variable_set_layout_prefix() {
        let vars = sample_variables();
        let data = vars.serialize();
        let p = data.payload();
        // [numVars | numDsc | loBs | upBs | dscIndices | sos1Groups | ...]
        assert_eq!(p[0], 3.0);
        assert_eq!(p[1], 2.0);
        assert_eq!(&p[2..5], &[0.0, -1.0, 0.0]);
        assert_eq!(&p[5..8], &[1.0, 2.0, f64::INFINITY]);
        assert_eq!(&p[8..10], &[0.0, 1.0]);
        assert_eq!(&p[10..12], &[3.0, 3.0]);
    }

    #[test]
    fn test_variable_set_round_trip() {
        let mut vars = sample_variables();
        assert_eq!(
            VariableSet::deserialize(&vars.serialize()).unwrap(),
            vars
        );

        vars.set_pseudo_costs(vec![0.5; 4], vec![2.0; 4]).unwrap();
        assert_eq!(
            VariableSet::deserialize(&vars.serialize()).unwrap(),
            vars
        );
    }

    #[test]
    fn test_status_round_trip() {
        let status = Status {
            description: Description::OptimalSolutionFound,
            obj_lob: -2.5,
            obj_upb: -2.5,
            total_time: 0.25,
            nodes_explored: 17,
        };
        assert_eq!(Status::deserialize(&status.serialize()).unwrap(), status);

        // Infinite bounds survive.
        let fresh = Status::new();
        assert_eq!(Status::deserialize(&fresh.serialize()).unwrap(), fresh);
    }

    #[test]
    fn test_node_round_trip() {
        let mut node = Node::root(&sample_variables());
        node.objective = -1.5;
        node.primal = vec![0.75, 0.75, 0.1];
        node.dual = vec![0.5];
        node.avg_frac = 0.25;
        node.depth = 3;
        node.reliable = false;
        node.branch = Some(BranchInfo {
            pos: 1,
            dir: Direction::Up,
            frac_dist: 0.25,
            parent_objective: -2.0,
        });
        assert_eq!(Node::deserialize(&node.serialize()).unwrap(), node);
    }

    #[test]
    fn test_problem_round_trip() {
        let q = CsMat::new_csc((2, 2), vec![0, 1, 2], vec![0, 1], vec![2.0, 2.0]);
        let a = CsMat::new_csc((1, 2), vec![0, 1, 2], vec![0, 0], vec![1.0, 1.0]);
        let problem = Problem::new(
            Objective::Quadratic {
                q,
                l: vec![1.0, -1.0],
            },
            ConstraintSet::Linear {
                a,
                lo: vec![1.5],
                up: vec![f64::INFINITY],
            },
            VariableSet::new(vec![0.0, 0.0], vec![1.0, 1.0])
                .unwrap()
                .with_discrete(vec![0, 1])
                .unwrap(),
        )
        .unwrap();
        assert_eq!(Problem::deserialize(&problem.serialize()).unwrap(), problem);
    }

    #[test]
    fn test_truncated_data_rejected() {
        let vars = sample_variables();
        let mut raw = vars.serialize().as_slice().to_vec();
        raw.pop();
        raw[0] -= 1.0;
        let data = SerialData::from_vec(raw).unwrap();
        assert!(VariableSet::deserialize(&data).is_err());
    }
}
