pub mod add_reminder;
pub mod shell_cmd;
