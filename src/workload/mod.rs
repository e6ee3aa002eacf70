//! Operation kinds and the weighted event source
//!
//! A workload is a table of `<op_name> <weight>` lines. Weights are
//! normalized into a cumulative distribution once at startup; each driver
//! step draws a uniform value in `[0, 1)` and binary-searches the table for
//! the operation to run.

use anyhow::{bail, Context};
use rand::Rng;
use std::fmt;
use std::path::Path;

/// Kind of workload operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Read,
    RandomRead,
    Create,
    RandomWrite,
    Append,
    Link,
    Delete,
    Rename,
    Truncate,
    Hardlink,
    RandomDiscard,
}

impl OpKind {
    /// All operation kinds, in workload-table order
    pub const ALL: [OpKind; 11] = [
        OpKind::Read,
        OpKind::RandomRead,
        OpKind::Create,
        OpKind::RandomWrite,
        OpKind::Append,
        OpKind::Link,
        OpKind::Delete,
        OpKind::Rename,
        OpKind::Truncate,
        OpKind::Hardlink,
        OpKind::RandomDiscard,
    ];

    /// Workload-table and CSV name of this kind
    pub fn name(self) -> &'static str {
        match self {
            OpKind::Read => "read",
            OpKind::RandomRead => "random_read",
            OpKind::Create => "create",
            OpKind::RandomWrite => "random_write",
            OpKind::Append => "append",
            OpKind::Link => "link",
            OpKind::Delete => "delete",
            OpKind::Rename => "rename",
            OpKind::Truncate => "truncate",
            OpKind::Hardlink => "hardlink",
            OpKind::RandomDiscard => "random_discard",
        }
    }

    pub fn from_name(name: &str) -> Option<OpKind> {
        OpKind::ALL.iter().copied().find(|k| k.name() == name)
    }

    /// Stable dense index, for per-kind arrays
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Normalized cumulative weight table over operation kinds
///
/// Zero-weight kinds are dropped at construction and can never be drawn.
#[derive(Debug, Clone)]
pub struct WeightTable {
    // (cumulative probability, kind), cumulative strictly increasing to 1.0
    cumulative: Vec<(f64, OpKind)>,
}

impl WeightTable {
    /// Equal weights over every operation kind
    pub fn equal() -> Self {
        let weights: Vec<(OpKind, f64)> = OpKind::ALL.iter().map(|&k| (k, 1.0)).collect();
        Self::from_weights(&weights).expect("equal weights are always valid")
    }

    /// Build from explicit (kind, weight) pairs
    pub fn from_weights(weights: &[(OpKind, f64)]) -> crate::Result<Self> {
        for &(kind, w) in weights {
            if w < 0.0 || !w.is_finite() {
                bail!("weight for {} must be a non-negative number, got {}", kind, w);
            }
        }
        let total: f64 = weights.iter().map(|&(_, w)| w).sum();
        if total <= 0.0 {
            bail!("workload table has no positive weights");
        }

        let mut cumulative = Vec::with_capacity(weights.len());
        let mut acc = 0.0;
        for &(kind, w) in weights {
            if w == 0.0 {
                continue;
            }
            acc += w / total;
            cumulative.push((acc, kind));
        }
        // guard against float drift in the final bucket
        if let Some(last) = cumulative.last_mut() {
            last.0 = 1.0;
        }
        Ok(Self { cumulative })
    }

    /// Parse workload-table text: one `<op_name> <weight>` per line, `#`
    /// comments and blank lines ignored, unknown names rejected.
    pub fn parse(text: &str) -> crate::Result<Self> {
        let mut weights = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let name = fields.next().unwrap();
            let weight = fields
                .next()
                .with_context(|| format!("line {}: missing weight for {:?}", lineno + 1, name))?;
            if fields.next().is_some() {
                bail!("line {}: trailing fields after {:?}", lineno + 1, line);
            }
            let kind = OpKind::from_name(name)
                .with_context(|| format!("line {}: unknown operation {:?}", lineno + 1, name))?;
            let weight: f64 = weight
                .parse()
                .with_context(|| format!("line {}: invalid weight {:?}", lineno + 1, weight))?;
            weights.push((kind, weight));
        }
        if weights.is_empty() {
            bail!("workload table is empty");
        }
        Self::from_weights(&weights)
    }

    /// Load and parse a workload-table file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read workload table {}", path.display()))?;
        Self::parse(&text)
            .with_context(|| format!("malformed workload table {}", path.display()))
    }

    /// Draw the next operation kind
    pub fn gen_event<R: Rng>(&self, rng: &mut R) -> OpKind {
        let u: f64 = rng.gen_range(0.0..1.0);
        let i = self.cumulative.partition_point(|&(c, _)| c <= u);
        // u < 1.0 and the final cumulative is exactly 1.0, so i is in range
        self.cumulative[i].1
    }

    /// Kinds this table can produce
    pub fn kinds(&self) -> impl Iterator<Item = OpKind> + '_ {
        self.cumulative.iter().map(|&(_, k)| k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn test_op_kind_name_roundtrip() {
        for kind in OpKind::ALL {
            assert_eq!(OpKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(OpKind::from_name("chmod"), None);
    }

    #[test]
    fn test_equal_table_draws_every_kind() {
        let table = WeightTable::equal();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..5000 {
            seen.insert(table.gen_event(&mut rng));
        }
        assert_eq!(seen.len(), OpKind::ALL.len());
    }

    #[test]
    fn test_zero_weight_kind_is_never_drawn() {
        let table = WeightTable::from_weights(&[
            (OpKind::Create, 1.0),
            (OpKind::Delete, 0.0),
            (OpKind::Read, 3.0),
        ])
        .unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(4);
        let mut reads = 0usize;
        for _ in 0..4000 {
            match table.gen_event(&mut rng) {
                OpKind::Delete => panic!("zero-weight kind drawn"),
                OpKind::Read => reads += 1,
                OpKind::Create => {}
                other => panic!("unexpected kind {}", other),
            }
        }
        // read carries 3/4 of the probability mass
        assert!((2700..=3300).contains(&reads), "reads={}", reads);
    }

    #[test]
    fn test_parse_table() {
        let table = WeightTable::parse(
            "# aging mix\n\
             create 4\n\
             read 2\n\
             \n\
             delete 1  # trim the tree\n",
        )
        .unwrap();
        let kinds: Vec<_> = table.kinds().collect();
        assert_eq!(kinds, vec![OpKind::Create, OpKind::Read, OpKind::Delete]);
    }

    #[test]
    fn test_parse_rejects_unknown_op() {
        assert!(WeightTable::parse("chmod 1\n").is_err());
    }

    #[test]
    fn test_parse_rejects_negative_weight() {
        assert!(WeightTable::parse("read -1\n").is_err());
    }

    #[test]
    fn test_parse_rejects_missing_weight() {
        assert!(WeightTable::parse("read\n").is_err());
    }

    #[test]
    fn test_all_zero_weights_rejected() {
        assert!(WeightTable::parse("read 0\ncreate 0\n").is_err());
    }
}
