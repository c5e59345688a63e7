//! Streaming download pipeline
//!
//! A [`Recipe`] describes how one remote file becomes one or more local
//! dumps: the response body is pulled through each [`Step`] in order, and
//! every chain ends by writing a destination file. Archives can fork into
//! per-member branches, and forked branches can be merged back into a
//! single downstream chain.
//!
//! ```text
//! taxdump.tar.gz ─ Gz ─ Tar ─ Fork ┬ names.dmp ┐
//!                                  └ nodes.dmp ┴ Merge(join) ─ WriteFile(taxonomy.dmp)
//! ```
//!
//! Recipes are validated when built, so the executor never meets a step in
//! a position it cannot handle.

pub mod decompression;
pub mod executor;
pub mod staging;
pub mod transform;

pub use executor::Executor;
pub use staging::Staging;
pub use transform::line_transform;

use std::collections::HashSet;
use std::fmt;
use std::io::{self, Read};

use crate::error::{IngestError, Result};

/// A byte stream flowing between steps
pub type Stream<'a> = Box<dyn Read + 'a>;

/// Format preprocessor wrapping a stream
pub type TransformFn = for<'a> fn(Stream<'a>) -> io::Result<Stream<'a>>;

/// Combines forked branch streams, given in declaration order
pub type MergeFn = for<'a> fn(Vec<Stream<'a>>) -> io::Result<Stream<'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Gz,
    Tar,
    Zip,
}

#[derive(Clone)]
pub enum Step {
    Decompress(Codec),
    Transform(TransformFn),
    /// One branch per archive member; must follow `Tar` or `Zip`
    Fork(Vec<Branch>),
    /// Must directly follow a `Fork`
    Merge(MergeFn),
    /// Final step of a chain; the name is relative to the dump directory
    WriteFile(String),
}

impl Step {
    pub fn write(name: impl Into<String>) -> Self {
        Step::WriteFile(name.into())
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Decompress(codec) => f.debug_tuple("Decompress").field(codec).finish(),
            Step::Transform(_) => f.write_str("Transform(..)"),
            Step::Fork(branches) => f.debug_tuple("Fork").field(branches).finish(),
            Step::Merge(_) => f.write_str("Merge(..)"),
            Step::WriteFile(name) => f.debug_tuple("WriteFile").field(name).finish(),
        }
    }
}

/// Sub-pipeline for one archive member
#[derive(Debug, Clone)]
pub struct Branch {
    /// Full member path or bare file name
    pub member: String,
    pub steps: Vec<Step>,
}

impl Branch {
    pub fn new(member: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            member: member.into(),
            steps,
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        path == self.member || path.rsplit('/').next() == Some(self.member.as_str())
    }
}

/// Validated step list for one remote address
#[derive(Debug, Clone)]
pub struct Recipe {
    url: String,
    steps: Vec<Step>,
}

impl Recipe {
    pub fn new(url: impl Into<String>, steps: Vec<Step>) -> Result<Self> {
        let url = url.into();
        validate_chain(&steps).map_err(|message| IngestError::InvalidRecipe {
            url: url.clone(),
            message,
        })?;
        Ok(Self { url, steps })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Every file this recipe writes, in declaration order
    pub fn destinations(&self) -> Vec<&str> {
        let mut out = Vec::new();
        collect_destinations(&self.steps, &mut out);
        out
    }
}

fn collect_destinations<'s>(steps: &'s [Step], out: &mut Vec<&'s str>) {
    for step in steps {
        match step {
            Step::WriteFile(name) => out.push(name),
            Step::Fork(branches) => {
                for branch in branches {
                    collect_destinations(&branch.steps, out);
                }
            },
            _ => {},
        }
    }
}

fn validate_chain(steps: &[Step]) -> std::result::Result<(), String> {
    let Some(last) = steps.last() else {
        return Err("empty step list".to_string());
    };

    for (i, step) in steps.iter().enumerate() {
        let previous = i.checked_sub(1).map(|p| &steps[p]);
        match step {
            Step::WriteFile(name) => {
                if i + 1 != steps.len() {
                    return Err(format!("WriteFile({}) must be the last step", name));
                }
                if name.is_empty() || name.contains('/') || name.ends_with(staging::SENTINEL_SUFFIX) {
                    return Err(format!("invalid destination name '{}'", name));
                }
            },
            Step::Fork(branches) => {
                if !matches!(previous, Some(Step::Decompress(Codec::Tar | Codec::Zip))) {
                    return Err("Fork must follow a tar or zip step".to_string());
                }
                validate_branches(branches, matches!(steps.get(i + 1), Some(Step::Merge(_))))?;
                if !matches!(steps.get(i + 1), None | Some(Step::Merge(_))) {
                    return Err("only Merge may follow a Fork".to_string());
                }
            },
            Step::Merge(_) => {
                if !matches!(previous, Some(Step::Fork(_))) {
                    return Err("Merge must directly follow a Fork".to_string());
                }
            },
            Step::Decompress(_) | Step::Transform(_) => {},
        }
    }

    match last {
        Step::WriteFile(_) | Step::Fork(_) => Ok(()),
        other => Err(format!("chain ends with {:?} instead of WriteFile", other)),
    }
}

fn validate_branches(branches: &[Branch], merged: bool) -> std::result::Result<(), String> {
    if branches.is_empty() {
        return Err("Fork without branches".to_string());
    }
    let mut seen = HashSet::new();
    for branch in branches {
        if !seen.insert(branch.member.as_str()) {
            return Err(format!("member '{}' listed twice", branch.member));
        }
        if merged {
            let bad = branch
                .steps
                .iter()
                .find(|s| !matches!(s, Step::Decompress(Codec::Gz) | Step::Transform(_)));
            if let Some(step) = bad {
                return Err(format!(
                    "merged branch '{}' may only gunzip or transform, found {:?}",
                    branch.member, step
                ));
            }
        } else {
            validate_chain(&branch.steps)
                .map_err(|e| format!("branch '{}': {}", branch.member, e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn passthrough<'a>(stream: Stream<'a>) -> io::Result<Stream<'a>> {
        Ok(stream)
    }

    fn concat<'a>(streams: Vec<Stream<'a>>) -> io::Result<Stream<'a>> {
        Ok(streams
            .into_iter()
            .reduce(|a, b| Box::new(a.chain(b)))
            .unwrap_or_else(|| Box::new(io::empty())))
    }

    #[test]
    fn test_simple_chain_is_valid() {
        let recipe = Recipe::new(
            "http://example.org/chebi.obo.gz",
            vec![Step::Decompress(Codec::Gz), Step::write("chebi.obo")],
        )
        .unwrap();
        assert_eq!(recipe.destinations(), ["chebi.obo"]);
    }

    #[test]
    fn test_fork_with_merge() {
        let recipe = Recipe::new(
            "http://example.org/taxdump.tar.gz",
            vec![
                Step::Decompress(Codec::Gz),
                Step::Decompress(Codec::Tar),
                Step::Fork(vec![
                    Branch::new("names.dmp", vec![]),
                    Branch::new("nodes.dmp", vec![Step::Transform(passthrough)]),
                ]),
                Step::Merge(concat),
                Step::write("taxonomy.dmp"),
            ],
        )
        .unwrap();
        assert_eq!(recipe.destinations(), ["taxonomy.dmp"]);
    }

    #[test]
    fn test_fork_without_merge_needs_write_in_every_branch() {
        let ok = Recipe::new(
            "u",
            vec![
                Step::Decompress(Codec::Zip),
                Step::Fork(vec![
                    Branch::new("a.txt", vec![Step::write("a.txt")]),
                    Branch::new("b.txt", vec![Step::Decompress(Codec::Gz), Step::write("b.txt")]),
                ]),
            ],
        )
        .unwrap();
        assert_eq!(ok.destinations(), ["a.txt", "b.txt"]);

        let err = Recipe::new(
            "u",
            vec![
                Step::Decompress(Codec::Zip),
                Step::Fork(vec![Branch::new("a.txt", vec![])]),
            ],
        );
        assert!(matches!(err, Err(IngestError::InvalidRecipe { .. })));
    }

    #[test]
    fn test_invalid_layouts() {
        let cases = vec![
            vec![],
            vec![Step::Decompress(Codec::Gz)],
            vec![Step::write("a"), Step::write("b")],
            vec![Step::Fork(vec![Branch::new("a", vec![Step::write("a")])])],
            vec![Step::Decompress(Codec::Gz), Step::Merge(concat), Step::write("a")],
            vec![
                Step::Decompress(Codec::Tar),
                Step::Fork(vec![Branch::new("a", vec![Step::write("a")])]),
                Step::Merge(concat),
                Step::write("b"),
            ],
            vec![
                Step::Decompress(Codec::Tar),
                Step::Fork(vec![Branch::new("a", vec![]), Branch::new("a", vec![])]),
                Step::Merge(concat),
                Step::write("b"),
            ],
            vec![Step::write("dump.tmp")],
        ];
        for steps in cases {
            let desc = format!("{:?}", steps);
            assert!(Recipe::new("u", steps).is_err(), "accepted {}", desc);
        }
    }

    #[test]
    fn test_branch_matches_full_path_or_file_name() {
        let branch = Branch::new("RXNCONSO.RRF", vec![]);
        assert!(branch.matches("rrf/RXNCONSO.RRF"));
        assert!(branch.matches("RXNCONSO.RRF"));
        assert!(!branch.matches("rrf/RXNSAT.RRF"));
        assert!(Branch::new("rrf/RXNCONSO.RRF", vec![]).matches("rrf/RXNCONSO.RRF"));
    }
}
