//! External input/output naming from `feed` and `fetch` marker operators.
//!
//! Each `feed` operator's `col` attribute is the external input slot of the
//! argument in its `Out` slot; each `fetch` operator's `col` is the output slot
//! of the argument in its `X` slot. Slots must be dense and unique.

use super::OpDesc;
use crate::core::{CompileError, CompileResult};

pub const FEED_OP: &str = "feed";
pub const FETCH_OP: &str = "fetch";

/// Ordered external input and output names.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeedFetch {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

impl FeedFetch {
    /// Collect names from operators in any order (program order or runtime order).
    pub fn from_ops<'a, I>(ops: I) -> CompileResult<Self>
    where
        I: IntoIterator<Item = &'a OpDesc>,
    {
        let mut feeds = Vec::new();
        let mut fetches = Vec::new();
        for op in ops {
            match op.op_type() {
                FEED_OP => feeds.push(op),
                FETCH_OP => fetches.push(op),
                _ => {}
            }
        }

        Ok(Self {
            inputs: order_by_col(&feeds, "Out", true)?,
            outputs: order_by_col(&fetches, "X", false)?,
        })
    }
}

fn order_by_col(ops: &[&OpDesc], slot: &str, is_output_slot: bool) -> CompileResult<Vec<String>> {
    let mut names: Vec<Option<String>> = vec![None; ops.len()];
    for op in ops {
        let col = op
            .attr("col")
            .and_then(|a| a.as_int())
            .ok_or_else(|| CompileError::FeedFetch {
                reason: format!("`{}` operator without integer `col` attribute", op.op_type()),
            })?;
        if col < 0 || col as usize >= ops.len() {
            return Err(CompileError::FeedFetch {
                reason: format!(
                    "`{}` col {} out of range for {} operators",
                    op.op_type(),
                    col,
                    ops.len()
                ),
            });
        }

        let args = if is_output_slot { op.output(slot) } else { op.input(slot) };
        let name = args.first().ok_or_else(|| CompileError::FeedFetch {
            reason: format!("`{}` col {} has no `{}` argument", op.op_type(), col, slot),
        })?;

        let entry = &mut names[col as usize];
        if entry.is_some() {
            return Err(CompileError::FeedFetch {
                reason: format!("duplicate `{}` col {}", op.op_type(), col),
            });
        }
        *entry = Some(name.clone());
    }
    // Dense by construction: n unique cols in [0, n).
    Ok(names.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Attribute;

    fn feed(col: i64, out: &str) -> OpDesc {
        OpDesc::new(FEED_OP)
            .with_input("X", ["feed"])
            .with_output("Out", [out])
            .with_attr("col", Attribute::Int(col))
    }

    fn fetch(col: i64, x: &str) -> OpDesc {
        OpDesc::new(FETCH_OP)
            .with_input("X", [x])
            .with_output("Out", ["fetch"])
            .with_attr("col", Attribute::Int(col))
    }

    #[test]
    fn test_feed_order_follows_col() {
        let ops = vec![feed(1, "b"), feed(0, "a"), fetch(0, "y")];
        let names = FeedFetch::from_ops(&ops).unwrap();
        assert_eq!(names.inputs, vec!["a", "b"]);
        assert_eq!(names.outputs, vec!["y"]);
    }

    #[test]
    fn test_duplicate_col_rejected() {
        let ops = vec![feed(0, "a"), feed(0, "b")];
        assert!(matches!(
            FeedFetch::from_ops(&ops),
            Err(CompileError::FeedFetch { .. })
        ));
    }

    #[test]
    fn test_out_of_range_col_rejected() {
        let ops = vec![fetch(3, "y")];
        assert!(FeedFetch::from_ops(&ops).is_err());
    }
}
