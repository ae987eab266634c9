use crate::ParserError;

/// Top-level record type of a demo tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoCommand {
    Signon = 1,
    Packet = 2,
    Synctick = 3,
    ConsoleCommand = 4,
    UserCommand = 5,
    DataTables = 6,
    Stop = 7,
    StringTables = 9,
}

impl TryFrom<u8> for DemoCommand {
    type Error = ParserError;

    fn try_from(cmd: u8) -> Result<Self, Self::Error> {
        Ok(match cmd {
            1 => DemoCommand::Signon,
            2 => DemoCommand::Packet,
            3 => DemoCommand::Synctick,
            4 => DemoCommand::ConsoleCommand,
            5 => DemoCommand::UserCommand,
            6 => DemoCommand::DataTables,
            7 => DemoCommand::Stop,
            9 => DemoCommand::StringTables,
            _ => return Err(ParserError::UnknownCommand(cmd)),
        })
    }
}
