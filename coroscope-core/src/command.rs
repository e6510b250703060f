//! デバッガコマンド

use crate::parse::split_args;
use crate::Result;

/// デバッガコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 継続チェーン（非同期バックトレース）表示
    AsyncBacktrace(Vec<String>),
    /// コルーチンフレームの内容表示
    ShowCoroFrame(Vec<String>),
    /// ヘルプ表示
    Help,
    /// 終了
    Quit,
    /// 未知のコマンド
    Unknown(String),
}

impl Command {
    /// コマンド文字列をパースする
    ///
    /// 空行の場合はNoneを返します。引数の数はここでは確認しません。
    pub fn parse(input: &str) -> Result<Option<Self>> {
        let mut parts = split_args(input)?;
        if parts.is_empty() {
            return Ok(None);
        }
        let name = parts.remove(0);

        let command = match name.as_str() {
            "async-bt" => Command::AsyncBacktrace(parts),
            "show-coro-frame" => Command::ShowCoroFrame(parts),
            "help" | "h" | "?" => Command::Help,
            "quit" | "q" | "exit" => Command::Quit,
            _ => Command::Unknown(name),
        };
        Ok(Some(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            Command::parse("async-bt 0x1000").unwrap(),
            Some(Command::AsyncBacktrace(vec!["0x1000".to_string()]))
        );
        assert_eq!(
            Command::parse("async-bt").unwrap(),
            Some(Command::AsyncBacktrace(Vec::new()))
        );
        assert_eq!(
            Command::parse("show-coro-frame 0x1000 extra").unwrap(),
            Some(Command::ShowCoroFrame(vec![
                "0x1000".to_string(),
                "extra".to_string()
            ]))
        );
        assert_eq!(Command::parse("quit").unwrap(), Some(Command::Quit));
        assert_eq!(Command::parse("q").unwrap(), Some(Command::Quit));
        assert_eq!(Command::parse("help").unwrap(), Some(Command::Help));
        assert_eq!(
            Command::parse("bt").unwrap(),
            Some(Command::Unknown("bt".to_string()))
        );
        assert_eq!(Command::parse("   ").unwrap(), None);
    }
}
