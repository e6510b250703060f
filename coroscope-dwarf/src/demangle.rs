//! シンボル名のデマングルと表示モード
//!
//! 表示モードはデバッガセッション全体で共有される設定です。
//! 一時的に切り替える場合は [`DemangleStyleGuard`] を使い、
//! スコープを抜けるときに必ず元のモードへ戻します。

use std::cell::Cell;
use tracing::trace;

/// シンボル名の表示モード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DemangleStyle {
    /// デマングル可能な名前はデマングルして表示する
    #[default]
    Auto,
    /// リンケージ名をそのまま表示する
    None,
}

thread_local! {
    // REPLは単一スレッドで動くため、実質的にプロセス全体の設定として振る舞う
    static CURRENT_STYLE: Cell<DemangleStyle> = const { Cell::new(DemangleStyle::Auto) };
}

impl DemangleStyle {
    /// 現在の表示モードを取得する
    pub fn current() -> Self {
        CURRENT_STYLE.with(|style| style.get())
    }

    /// 表示モードを設定し、以前のモードを返す
    fn replace(self) -> Self {
        CURRENT_STYLE.with(|style| style.replace(self))
    }
}

/// 表示モードの一時変更ガード
///
/// 作成時にモードを切り替え、ドロップ時に以前のモードを復元します。
/// `?` による早期リターンでも復元されます。
#[must_use = "the previous style is restored as soon as the guard is dropped"]
pub struct DemangleStyleGuard {
    previous: DemangleStyle,
}

impl DemangleStyleGuard {
    /// 表示モードを `style` に切り替える
    pub fn set(style: DemangleStyle) -> Self {
        let previous = style.replace();
        trace!("demangle style {:?} -> {:?}", previous, style);
        Self { previous }
    }

    /// 切り替え前のモード
    pub fn previous(&self) -> DemangleStyle {
        self.previous
    }
}

impl Drop for DemangleStyleGuard {
    fn drop(&mut self) {
        let replaced = self.previous.replace();
        trace!("demangle style {:?} restored (was {:?})", self.previous, replaced);
    }
}

/// シンボル名をデマングルする
///
/// Rustのシンボルを優先し、次にItanium C++ ABIのシンボルを試します。
/// どちらでもなければそのまま返します。
pub fn demangle(name: &str) -> String {
    if let Ok(demangled) = rustc_demangle::try_demangle(name) {
        return format!("{:#}", demangled);
    }

    if name.starts_with("_Z") {
        if let Ok(symbol) = cpp_demangle::Symbol::new(name.as_bytes()) {
            if let Ok(demangled) = symbol.demangle(&cpp_demangle::DemangleOptions::default()) {
                return demangled;
            }
        }
    }

    name.to_string()
}

/// 現在の表示モードに従ってシンボル名を整形する
pub fn display_name(raw: &str) -> String {
    match DemangleStyle::current() {
        DemangleStyle::Auto => demangle(raw),
        DemangleStyle::None => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demangle_cpp_and_rust() {
        assert_eq!(demangle("_Z3fooi"), "foo(int)");
        assert_eq!(
            demangle("_ZN12simple_async6double17h7e292cfcb2965d2eE"),
            "simple_async::double"
        );
        assert_eq!(demangle("plain_c_function"), "plain_c_function");
    }

    #[test]
    fn test_display_name_follows_style() {
        assert_eq!(DemangleStyle::current(), DemangleStyle::Auto);
        assert_eq!(display_name("_Z3fooi"), "foo(int)");

        {
            let guard = DemangleStyleGuard::set(DemangleStyle::None);
            assert_eq!(guard.previous(), DemangleStyle::Auto);
            assert_eq!(display_name("_Z3fooi"), "_Z3fooi");
        }

        assert_eq!(DemangleStyle::current(), DemangleStyle::Auto);
        assert_eq!(display_name("_Z3fooi"), "foo(int)");
    }

    #[test]
    fn test_guard_restores_on_early_return() {
        fn failing_lookup() -> Result<(), String> {
            let _guard = DemangleStyleGuard::set(DemangleStyle::None);
            assert_eq!(DemangleStyle::current(), DemangleStyle::None);
            Err::<(), _>("no type".to_string())?;
            Ok(())
        }

        assert!(failing_lookup().is_err());
        assert_eq!(DemangleStyle::current(), DemangleStyle::Auto);
    }

    #[test]
    fn test_nested_guards_unwind_in_order() {
        let outer = DemangleStyleGuard::set(DemangleStyle::None);
        {
            let inner = DemangleStyleGuard::set(DemangleStyle::Auto);
            assert_eq!(inner.previous(), DemangleStyle::None);
            assert_eq!(DemangleStyle::current(), DemangleStyle::Auto);
        }
        assert_eq!(DemangleStyle::current(), DemangleStyle::None);
        drop(outer);
        assert_eq!(DemangleStyle::current(), DemangleStyle::Auto);
    }
}
