//! Constants shared by the generated script and the invocation transport.

/// Opens the in-band result record on standard output.
pub const RESULT_START: &str = "__RESULT__";

/// Closes the in-band result record.
pub const RESULT_END: &str = "__END_RESULT__";

/// Key set to `true` in a result record that carries a thrown error.
pub const ERROR_FLAG: &str = "__error";

/// Usage line printed by the generated script when no function is named.
pub const USAGE: &str = "Usage: run <functionName> [<jsonPayload>]";
