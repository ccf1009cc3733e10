pub const SUCCESS: i32 = 0;
/// Missing or unreadable input, or arguments that do not fit the data
pub const INPUT_ERROR: i32 = 1;
pub const EXECUTION_ERROR: i32 = 2;
/// Catalog or palette could not be loaded
pub const CONFIG_ERROR: i32 = 3;
