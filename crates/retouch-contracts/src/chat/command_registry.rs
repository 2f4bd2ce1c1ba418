/// How a command takes its argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ArgShape {
    /// The rest of the line, kept verbatim under the given key.
    Raw(&'static str),
    /// One path, with shell-style quoting.
    Path,
    Bare,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    pub shape: ArgShape,
}

const fn command(command: &'static str, action: &'static str, shape: ArgShape) -> CommandSpec {
    CommandSpec {
        command,
        action,
        shape,
    }
}

const COMMANDS: &[CommandSpec] = &[
    command("prompt", "set_prompt", ArgShape::Raw("text")),
    command("fetch", "select_url", ArgShape::Raw("url")),
    command("url", "select_url", ArgShape::Raw("url")),
    command("model", "set_model", ArgShape::Raw("model")),
    command("open", "select_file", ArgShape::Path),
    command("upload", "select_file", ArgShape::Path),
    command("save", "save_edited", ArgShape::Path),
    command("submit", "submit", ArgShape::Bare),
    command("status", "status", ArgShape::Bare),
    command("help", "help", ArgShape::Bare),
    command("quit", "quit", ArgShape::Bare),
    command("exit", "quit", ArgShape::Bare),
];

/// `command` must already be lowercase.
pub(crate) fn lookup(command: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.command == command)
}

pub const SESSION_HELP_COMMANDS: &[&str] = &[
    "/open <path>",
    "/fetch <url>",
    "/prompt <text>",
    "/submit",
    "/save <path>",
    "/status",
    "/model <name>",
    "/help",
    "/quit",
];
