//! `async-bt` と `show-coro-frame` の実装

use crate::context::CommandContext;
use crate::errors::{CoroError, USAGE_ASYNC_BT, USAGE_SHOW_CORO_FRAME};
use crate::inspector::FrameInspector;
use crate::parse::parse_address;
use crate::Result;
use coroscope_coro::{present, ChainWalker};
use std::io::Write;
use tracing::debug;

/// `async-bt [<pointer to task>]`
///
/// 引数がなければ現在の関数の `__coro_frame` から開始します。
pub fn async_backtrace(ctx: &dyn CommandContext, args: &[String], out: &mut dyn Write) -> Result<()> {
    report_inline(run_async_backtrace(ctx, args, out), out)
}

/// `show-coro-frame <address of coroutine frame>`
pub fn show_coro_frame(ctx: &dyn CommandContext, args: &[String], out: &mut dyn Write) -> Result<()> {
    report_inline(run_show_coro_frame(ctx, args, out), out)
}

fn run_async_backtrace(ctx: &dyn CommandContext, args: &[String], out: &mut dyn Write) -> Result<()> {
    let start = match args {
        [] => ctx.current_coro_frame().map_err(|e| {
            debug!("__coro_frame inference failed: {:#}", e);
            CoroError::ContextInference
        })?,
        [address] => parse_address(address)?,
        _ => return Err(CoroError::input(USAGE_ASYNC_BT).into()),
    };

    let chain = ChainWalker::new(ctx.memory(), ctx.symbols(), ctx.layout()).walk(start)?;
    for (index, record) in chain.iter().enumerate() {
        writeln!(out, "{}", present(record, index))?;
    }
    Ok(())
}

fn run_show_coro_frame(ctx: &dyn CommandContext, args: &[String], out: &mut dyn Write) -> Result<()> {
    let [address] = args else {
        return Err(CoroError::input(USAGE_SHOW_CORO_FRAME).into());
    };
    let frame_address = parse_address(address)?;

    let text = FrameInspector::new(ctx.memory(), ctx.symbols()).inspect(frame_address)?;
    writeln!(out, "{}", text)?;
    Ok(())
}

/// 入力エラーなどをメッセージとして出力し、それ以外のエラーは伝播する
fn report_inline(result: Result<()>, out: &mut dyn Write) -> Result<()> {
    let Err(err) = result else {
        return Ok(());
    };
    match err.downcast_ref::<CoroError>() {
        Some(error) if error.is_reported_inline() => {
            writeln!(out, "{}", error)?;
            Ok(())
        }
        _ => Err(err),
    }
}
