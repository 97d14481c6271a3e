//! Input line parsing.

use chatlink_session::UserId;

use crate::error::CommandError;

/// One line typed at the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/join <user>...`: open the room shared with these users
    Join(Vec<UserId>),
    /// `/leave`
    Leave,
    /// `/room`: show the current room
    Room,
    /// `/retry`: resend the last failed message
    Retry,
    /// `/help`
    Help,
    /// `/quit`
    Quit,
    /// Anything else is a message for the current room
    Say(String),
}

pub const HELP: &str = "\
/join <user>...  open the room shared with these users
/leave           leave the current room
/room            show the current room
/retry           resend the last failed message
/quit            exit
<text>           send a message to the current room";

/// Parse one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Say(line.to_string())));
    };

    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or_default();
    let command = match name {
        "join" => {
            let users = words
                .map(|id| {
                    UserId::new(id).map_err(|source| CommandError::InvalidUser {
                        id: id.to_string(),
                        source,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            if users.is_empty() {
                return Err(CommandError::MissingArgument("/join <user>..."));
            }
            Command::Join(users)
        }
        "leave" => Command::Leave,
        "room" => Command::Room,
        "retry" => Command::Retry,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(CommandError::UnknownCommand(other.to_string())),
    };
    Ok(Some(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_a_message() {
        // テスト項目: スラッシュで始まらない入力はメッセージになる
        // when (操作):
        let command = parse("  hello there ").unwrap();

        // then (期待する結果):
        assert_eq!(command, Some(Command::Say("hello there".to_string())));
    }

    #[test]
    fn test_blank_line_is_ignored() {
        // テスト項目: 空行は何もしない
        assert_eq!(parse("   ").unwrap(), None);
    }

    #[test]
    fn test_join_collects_users() {
        // テスト項目: /join は複数のユーザーを受け付ける
        // when (操作):
        let command = parse("/join bob carol").unwrap();

        // then (期待する結果):
        assert_eq!(
            command,
            Some(Command::Join(vec![
                UserId::new("bob").unwrap(),
                UserId::new("carol").unwrap(),
            ]))
        );
    }

    #[test]
    fn test_join_without_users_fails() {
        // テスト項目: /join に引数が無い場合はエラーになる
        assert_eq!(
            parse("/join").unwrap_err(),
            CommandError::MissingArgument("/join <user>...")
        );
    }

    #[test]
    fn test_unknown_command_fails() {
        // テスト項目: 未知のコマンドはエラーになる
        assert_eq!(
            parse("/dance").unwrap_err(),
            CommandError::UnknownCommand("dance".to_string())
        );
    }
}
