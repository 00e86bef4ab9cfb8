//! Start/end markers that bracket the build and test output.
//!
//! Downstream log viewers split the raw log stream on these lines, so they go
//! to stdout verbatim rather than through tracing.

const FENCE: &str = "#*#*#*#*#*#";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Start,
    End,
}

impl Edge {
    fn as_str(&self) -> &'static str {
        match self {
            Edge::Start => "start",
            Edge::End => "end",
        }
    }
}

pub fn marker(section: &str, edge: Edge) -> String {
    format!("{FENCE} buildfarm-{section}-{} {FENCE}", edge.as_str())
}

pub fn print_start(section: &str) {
    println!("{}", marker(section, Edge::Start));
}

pub fn print_end(section: &str) {
    println!("{}", marker(section, Edge::End));
}
