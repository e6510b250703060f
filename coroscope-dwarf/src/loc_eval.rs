//! DWARF ロケーション式評価
//!
//! DWARFのロケーション式を評価して、変数のメモリ上の位置を特定します。

use crate::memory::read_le;
use crate::Result;
use gimli::{Evaluation, EvaluationResult, Location, Piece, Reader, Value};

/// x86-64のDWARFレジスタ番号: rbp
pub const DWARF_REG_RBP: u16 = 6;

/// ロケーション評価の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Loc {
    /// レジスタに格納されている
    Reg { reg: u16 },
    /// メモリアドレス
    Addr { addr: u64, size: usize },
    /// 値そのもの（DW_OP_stack_value等）
    Value(u64),
    /// 複数のピースから構成される（構造体の一部など）
    Pieces(Vec<LocPiece>),
    /// 最適化により削除された
    Empty,
}

/// ロケーションのピース
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocPiece {
    /// サイズ（ビット）
    pub size_in_bits: u64,
    /// ビットオフセット
    pub bit_offset: Option<u64>,
    /// 実際のロケーション
    pub location: LocPieceLocation,
}

/// ピースのロケーション
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocPieceLocation {
    /// レジスタ
    Reg(u16),
    /// メモリアドレス
    Addr(u64),
    /// 値そのもの
    Value(Vec<u8>),
}

/// ロケーション評価器
pub struct LocationEvaluator<R: Reader> {
    eval: Option<Evaluation<R>>,
    frame_base: Option<u64>,
    cfa: Option<u64>,
    load_bias: u64,
}

impl<R: Reader<Offset = usize>> LocationEvaluator<R> {
    /// 新しいロケーション評価器を作成する
    ///
    /// # Arguments
    /// * `expr` - DWARF ロケーション式
    /// * `encoding` - DWARF エンコーディング情報
    pub fn new(expr: gimli::Expression<R>, encoding: gimli::Encoding) -> Self {
        Self {
            eval: Some(expr.evaluation(encoding)),
            frame_base: None,
            cfa: None,
            load_bias: 0,
        }
    }

    /// フレームベース（DW_OP_fbregの基準）を設定する
    pub fn with_frame_base(mut self, frame_base: u64) -> Self {
        self.frame_base = Some(frame_base);
        self
    }

    /// CFA（DW_OP_call_frame_cfaの値）を設定する
    pub fn with_cfa(mut self, cfa: u64) -> Self {
        self.cfa = Some(cfa);
        self
    }

    /// PIEのロードバイアス（DW_OP_addrに加算する）を設定する
    pub fn with_load_bias(mut self, load_bias: u64) -> Self {
        self.load_bias = load_bias;
        self
    }

    /// ロケーション式を評価する
    ///
    /// # Arguments
    /// * `get_reg` - レジスタ値を取得するコールバック
    /// * `read_mem` - メモリを読み取るコールバック
    pub fn evaluate<F, G>(&mut self, mut get_reg: F, mut read_mem: G) -> Result<Loc>
    where
        F: FnMut(u16) -> Result<u64>,
        G: FnMut(u64, usize) -> Result<Vec<u8>>,
    {
        let mut eval = self
            .eval
            .take()
            .ok_or_else(|| anyhow::anyhow!("Evaluation already consumed"))?;

        let mut result = eval.evaluate()?;
        loop {
            result = match result {
                EvaluationResult::Complete => break,
                EvaluationResult::RequiresRegister { register, .. } => {
                    let value = get_reg(register.0)?;
                    eval.resume_with_register(Value::Generic(value))?
                }
                EvaluationResult::RequiresFrameBase => {
                    let frame_base = self
                        .frame_base
                        .ok_or_else(|| anyhow::anyhow!("Frame base required but not provided"))?;
                    eval.resume_with_frame_base(frame_base)?
                }
                EvaluationResult::RequiresCallFrameCfa => {
                    let cfa = self
                        .cfa
                        .ok_or_else(|| anyhow::anyhow!("CFA required but not provided"))?;
                    eval.resume_with_call_frame_cfa(cfa)?
                }
                EvaluationResult::RequiresMemory { address, size, .. } => {
                    let bytes = read_mem(address, size as usize)?;
                    let value = read_le(&bytes, address)?;
                    eval.resume_with_memory(Value::Generic(value))?
                }
                EvaluationResult::RequiresRelocatedAddress(address) => {
                    eval.resume_with_relocated_address(address.wrapping_add(self.load_bias))?
                }
                other => {
                    return Err(anyhow::anyhow!("Unsupported evaluation result: {:?}", other));
                }
            };
        }

        let pieces = eval.result();
        match pieces.len() {
            0 => Ok(Loc::Empty),
            1 => Self::convert_piece(&pieces[0]),
            _ => {
                let pieces: Result<Vec<_>> = pieces.iter().map(Self::convert_piece_to_loc_piece).collect();
                Ok(Loc::Pieces(pieces?))
            }
        }
    }

    /// Pieceを Loc に変換する（単一ピース用）
    fn convert_piece(piece: &Piece<R>) -> Result<Loc> {
        match piece.location {
            Location::Empty => Ok(Loc::Empty),
            Location::Register { register } => Ok(Loc::Reg { reg: register.0 }),
            Location::Address { address } => {
                let size = piece.size_in_bits.map(|b| (b / 8) as usize).unwrap_or(8);
                Ok(Loc::Addr { addr: address, size })
            }
            Location::Value { value } => Ok(Loc::Value(value_to_u64(value))),
            _ => Ok(Loc::Empty),
        }
    }

    /// Pieceを LocPiece に変換する（複数ピース用）
    fn convert_piece_to_loc_piece(piece: &Piece<R>) -> Result<LocPiece> {
        let location = match piece.location {
            Location::Empty => return Err(anyhow::anyhow!("Empty piece location")),
            Location::Register { register } => LocPieceLocation::Reg(register.0),
            Location::Address { address } => LocPieceLocation::Addr(address),
            Location::Value { value } => {
                LocPieceLocation::Value(value_to_u64(value).to_le_bytes().to_vec())
            }
            _ => return Err(anyhow::anyhow!("Unsupported piece location")),
        };

        Ok(LocPiece {
            size_in_bits: piece.size_in_bits.unwrap_or(0),
            bit_offset: piece.bit_offset,
            location,
        })
    }
}

/// CFAの近似値
///
/// フレームポインタを保持する関数では、CFAは保存されたrbpと
/// リターンアドレスの直上（rbp + 16）になります。
pub fn approximate_cfa<F>(mut get_reg: F) -> Result<u64>
where
    F: FnMut(u16) -> Result<u64>,
{
    Ok(get_reg(DWARF_REG_RBP)?.wrapping_add(16))
}

fn value_to_u64(value: Value) -> u64 {
    match value {
        Value::Generic(v) | Value::U64(v) => v,
        Value::I8(v) => v as u64,
        Value::U8(v) => v as u64,
        Value::I16(v) => v as u64,
        Value::U16(v) => v as u64,
        Value::I32(v) => v as u64,
        Value::U32(v) => v as u64,
        Value::I64(v) => v as u64,
        Value::F32(v) => v.to_bits() as u64,
        Value::F64(v) => v.to_bits(),
    }
}
