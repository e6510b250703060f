//! パース関連のユーティリティ関数

use crate::errors::CoroError;
use anyhow::Result;

/// アドレス文字列をu64にパース
///
/// 16進数（0xプレフィックス付き）または10進数をサポート。
/// プレフィックスのない数字列は常に10進数として扱います。
///
/// # Examples
/// ```
/// use coroscope_core::parse::parse_address;
///
/// assert_eq!(parse_address("0x1234").unwrap(), 0x1234);
/// assert_eq!(parse_address("1234").unwrap(), 1234);
/// ```
pub fn parse_address(s: &str) -> Result<u64> {
    let s = s.trim();

    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16)
            .map_err(|e| CoroError::input(format!("Invalid address '{}': {}", s, e)).into());
    }

    s.parse::<u64>().map_err(|e| {
        let hint = if !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit()) {
            " (use a 0x prefix for hexadecimal)"
        } else {
            ""
        };
        CoroError::input(format!("Invalid address '{}': {}{}", s, e, hint)).into()
    })
}

/// コマンドラインを引数に分割する
///
/// シェルと同じ規則で引用符を扱います。
pub fn split_args(line: &str) -> Result<Vec<String>> {
    shlex::split(line)
        .ok_or_else(|| CoroError::input(format!("Unbalanced quotes in '{}'", line.trim())).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_hex() {
        assert_eq!(parse_address("0x1234").unwrap(), 0x1234);
        assert_eq!(parse_address("0X1234").unwrap(), 0x1234);
        assert_eq!(parse_address("0xabcd").unwrap(), 0xabcd);
        assert_eq!(parse_address("0xABCD").unwrap(), 0xabcd);
    }

    #[test]
    fn test_parse_address_dec() {
        assert_eq!(parse_address("1234").unwrap(), 1234);
        assert_eq!(parse_address("9999").unwrap(), 9999);
        assert_eq!(parse_address("401000").unwrap(), 401000);
    }

    #[test]
    fn test_parse_address_bare_hex_is_rejected() {
        let err = parse_address("40100a").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoroError>(),
            Some(CoroError::Input { .. })
        ));
        assert!(err.to_string().contains("use a 0x prefix"));
        assert!(!parse_address("xyz").unwrap_err().to_string().contains("0x prefix"));
    }

    #[test]
    fn test_parse_address_invalid_is_input_error() {
        for bad in ["xyz", "0xghij", ""] {
            let err = parse_address(bad).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<CoroError>(),
                Some(CoroError::Input { .. })
            ));
        }
    }

    #[test]
    fn test_split_args() {
        assert_eq!(split_args("async-bt  0x1000").unwrap(), vec!["async-bt", "0x1000"]);
        assert_eq!(split_args("a 'b c'").unwrap(), vec!["a", "b c"]);
        assert!(split_args("a 'b").is_err());
    }
}
