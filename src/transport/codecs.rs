/// Line splitting for process output.
pub(crate) mod lines;
