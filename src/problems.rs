//! Problem feeds: lazy, finite sequences of problem parameter sets
//!
//! Three variants exist behind a single iterator interface: a single
//! problem whose parameters are ambient CLI state, one opaque problem per
//! line of an input file, and schema-validated rows where each line is
//! tokenized and paired positionally with declared argument names.

use std::io::{self, BufRead};
use thiserror::Error;

/// One unit of work to benchmark, as ordered flag/value pairs
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProblemInstance {
    pairs: Vec<(String, String)>,
}
//
impl ProblemInstance {
    /// Parameter pairs in declaration order
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// Encode the parameters as argv tokens, one `--flag value` pair each
    pub fn argv_tokens(&self) -> impl Iterator<Item = String> + '_ {
        self.pairs
            .iter()
            .flat_map(|(flag, value)| [format!("--{flag}"), value.clone()])
    }
}

/// Source of problem instances for one run
pub struct ProblemFeed(Source);
//
impl std::fmt::Debug for ProblemFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProblemFeed").finish_non_exhaustive()
    }
}
//
enum Source {
    /// Exactly one problem, parameterized by ambient CLI state
    Single { done: bool },

    /// One opaque problem value per payload line
    Lines {
        reader: Box<dyn BufRead>,
        flag: String,
        line: usize,
    },

    /// Rows already tokenized and validated against the argument schema
    Rows(std::vec::IntoIter<ProblemInstance>),
}
//
impl ProblemFeed {
    /// Feed yielding a single problem with no encoded parameters
    pub fn single() -> Self {
        Self(Source::Single { done: false })
    }

    /// Feed yielding one problem per payload line of `reader`
    ///
    /// Each problem carries a single `(problem_flag, line)` pair. Blank
    /// lines and `#` comments are skipped and do not count as problems.
    pub fn lines(reader: impl BufRead + 'static, problem_flag: impl Into<String>) -> Self {
        Self(Source::Lines {
            reader: Box::new(reader),
            flag: problem_flag.into(),
            line: 0,
        })
    }

    /// Feed yielding one schema-validated problem per payload line
    ///
    /// The whole input is validated upfront: a row whose token count does
    /// not match the schema fails the run before any problem is processed.
    pub fn rows(mut reader: impl BufRead, schema: Vec<String>) -> Result<Self, FeedError> {
        let mut problems = Vec::new();
        let mut line = 0;
        while let Some(payload) = next_payload(&mut reader, &mut line)? {
            let tokens = payload.split_whitespace().collect::<Vec<_>>();
            if tokens.len() != schema.len() {
                return Err(FeedError::SchemaMismatch {
                    line,
                    expected: schema.len(),
                    found: tokens.len(),
                });
            }
            problems.push(ProblemInstance {
                pairs: schema
                    .iter()
                    .zip(tokens)
                    .map(|(name, value)| (name.clone(), value.to_owned()))
                    .collect(),
            });
        }
        Ok(Self(Source::Rows(problems.into_iter())))
    }
}
//
impl Iterator for ProblemFeed {
    type Item = Result<ProblemInstance, FeedError>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.0 {
            Source::Single { done } => (!std::mem::replace(done, true))
                .then(|| Ok(ProblemInstance::default())),
            Source::Lines { reader, flag, line } => {
                match next_payload(reader.as_mut(), line) {
                    Ok(Some(payload)) => Some(Ok(ProblemInstance {
                        pairs: vec![(flag.clone(), payload)],
                    })),
                    Ok(None) => None,
                    Err(e) => Some(Err(e)),
                }
            }
            Source::Rows(rows) => rows.next().map(Ok),
        }
    }
}

/// Read the next payload line, skipping blanks and stripping `#` comments
///
/// `line` tracks the 1-based number of the returned line for error reports.
fn next_payload(reader: &mut dyn BufRead, line: &mut usize) -> Result<Option<String>, FeedError> {
    let mut buf = String::new();
    loop {
        buf.clear();
        if reader.read_line(&mut buf)? == 0 {
            return Ok(None);
        }
        *line += 1;
        let payload = match buf.split_once('#') {
            Some((before_comment, _)) => before_comment,
            None => buf.as_str(),
        }
        .trim();
        if !payload.is_empty() {
            return Ok(Some(payload.to_owned()));
        }
    }
}

/// Bad problem input, aborting the whole run
#[derive(Debug, Error)]
pub enum FeedError {
    /// Failed to read from the input file
    #[error("failed to read problem input ({0})")]
    Io(#[from] io::Error),

    /// Row length does not match the declared argument schema
    #[error("line {line}: expected {expected} problem argument(s), found {found}")]
    SchemaMismatch {
        /// 1-based input line carrying the bad row
        line: usize,
        /// Declared schema length
        expected: usize,
        /// Tokens actually found on the line
        found: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Cursor;

    fn schema(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn collect(feed: ProblemFeed) -> Vec<ProblemInstance> {
        feed.map(|problem| problem.unwrap()).collect()
    }

    #[test]
    fn single_yields_once() {
        let problems = collect(ProblemFeed::single());
        assert_eq!(problems, [ProblemInstance::default()]);
        assert_eq!(problems[0].argv_tokens().count(), 0);
    }

    #[test]
    fn lines_skip_blanks_and_comments() {
        let input = "first\n\n# note\nsecond # trailing\n   \nthird\n";
        let problems = collect(ProblemFeed::lines(Cursor::new(input), "problem"));
        let values = problems
            .iter()
            .map(|p| p.pairs()[0].1.as_str())
            .collect::<Vec<_>>();
        assert_eq!(values, ["first", "second", "third"]);
        assert_eq!(
            problems[0].argv_tokens().collect::<Vec<_>>(),
            ["--problem", "first"]
        );
    }

    #[test]
    fn rows_pair_tokens_with_schema() {
        let input = "1.5 2.0  # comment\n# full comment line\n\n3.5 4.0\n";
        let feed = ProblemFeed::rows(Cursor::new(input), schema(&["freq", "mass"])).unwrap();
        let problems = collect(feed);
        assert_eq!(problems.len(), 2);
        assert_eq!(
            problems[0].pairs(),
            [
                ("freq".to_owned(), "1.5".to_owned()),
                ("mass".to_owned(), "2.0".to_owned()),
            ]
        );
        assert_eq!(
            problems[0].argv_tokens().collect::<Vec<_>>(),
            ["--freq", "1.5", "--mass", "2.0"]
        );
    }

    #[test]
    fn rows_fail_fast_on_bad_length() {
        // Validation is upfront, so the valid first line yields nothing
        let input = "1.5 2.0\n1.0 2.0 3.0\n";
        assert_matches!(
            ProblemFeed::rows(Cursor::new(input), schema(&["freq", "mass"])),
            Err(FeedError::SchemaMismatch {
                line: 2,
                expected: 2,
                found: 3,
            })
        );
    }

    #[test]
    fn payload_line_numbers() {
        let mut reader = Cursor::new("# header\n\nvalue\n");
        let mut line = 0;
        assert_eq!(
            next_payload(&mut reader, &mut line).unwrap().as_deref(),
            Some("value")
        );
        assert_eq!(line, 3);
        assert_eq!(next_payload(&mut reader, &mut line).unwrap(), None);
    }
}
