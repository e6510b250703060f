//! 変数値のフォーマット
//!
//! 型情報に基づいてメモリ上の値をgdbの `print pretty` と同じ形で整形します。
//!
//! ```text
//! {
//!   __resume_fn = 0x401136 <task() [clone .resume]>,
//!   __promise = {
//!     continuation = 0x0
//!   },
//!   __coro_index = 1 '\001'
//! }
//! ```

use crate::memory::{read_le, MemoryReader};
use crate::type_info::{Enumerator, FieldInfo, TypeInfo, MAX_TYPE_DEPTH};
use crate::Result;

/// アドレスをシンボル名に変換するコールバック
pub type Symbolizer<'a> = &'a dyn Fn(u64) -> Option<String>;

/// フォーマット制御オプション
#[derive(Debug, Clone)]
pub struct FormatOptions {
    /// 構造体のネストの最大深さ
    pub max_depth: usize,
    /// 配列・文字列で表示する最大要素数
    pub max_elements: usize,
    /// 同じ要素がこの回数以上続いたら `<repeats N times>` にまとめる
    pub repeat_threshold: usize,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            max_depth: MAX_TYPE_DEPTH,
            max_elements: 200,
            repeat_threshold: 10,
        }
    }
}

/// 値フォーマッター
///
/// メモリアドレスと型情報から値を読み取り、フォーマットします。
pub struct ValueFormatter<'a> {
    memory: &'a dyn MemoryReader,
    symbolizer: Option<Symbolizer<'a>>,
    options: FormatOptions,
}

impl<'a> ValueFormatter<'a> {
    /// 新しいフォーマッターを作成する
    pub fn new(memory: &'a dyn MemoryReader) -> Self {
        Self {
            memory,
            symbolizer: None,
            options: FormatOptions::default(),
        }
    }

    /// 関数ポインタの注釈に使うシンボル解決を設定する
    pub fn with_symbolizer(mut self, symbolizer: Symbolizer<'a>) -> Self {
        self.symbolizer = Some(symbolizer);
        self
    }

    pub fn with_options(mut self, options: FormatOptions) -> Self {
        self.options = options;
        self
    }

    /// `address` にある `type_info` 型の値をフォーマットする
    ///
    /// 構造体のメンバの読み取り失敗はその場に `<error: ...>` として埋め込まれ、
    /// スカラー値そのものが読めない場合のみエラーを返します。
    pub fn format(&self, address: u64, type_info: &TypeInfo) -> Result<String> {
        self.format_value(address, type_info, 0)
    }

    fn format_value(&self, address: u64, type_info: &TypeInfo, level: usize) -> Result<String> {
        match type_info {
            TypeInfo::Primitive { .. } => self.format_primitive(address, type_info),
            TypeInfo::Pointer { pointee_type, size } => {
                let value = self.read_scalar(address, *size)?;
                Ok(self.format_pointer(value, pointee_type.as_deref()))
            }
            TypeInfo::Reference { size, .. } => {
                let value = self.read_scalar(address, *size)?;
                Ok(format!("@0x{:x}", value))
            }
            TypeInfo::Struct { fields, .. } => Ok(self.format_members(address, fields, level)),
            TypeInfo::Union { members, .. } => Ok(self.format_members(address, members, level)),
            TypeInfo::Enum {
                size, enumerators, ..
            } => {
                let raw = self.read_scalar(address, *size)?;
                Ok(format_enum(raw, *size, enumerators))
            }
            TypeInfo::Array {
                element_type,
                length,
            } => match (element_type, length) {
                (Some(element), Some(length)) => self.format_array(address, element, *length, level),
                _ => Ok("{}".to_string()),
            },
            TypeInfo::Subroutine => Ok(format!("{{void (void)}} {}", self.format_code_address(address))),
            TypeInfo::Truncated { .. } => Ok("{...}".to_string()),
            TypeInfo::Unknown => Ok("<unknown type>".to_string()),
        }
    }

    /// 構造体・Unionのメンバをフォーマットする
    fn format_members(&self, address: u64, fields: &[FieldInfo], level: usize) -> String {
        if fields.is_empty() {
            return "{}".to_string();
        }
        if level >= self.options.max_depth {
            return "{...}".to_string();
        }

        let inner = indent(level + 1);
        let lines: Vec<String> = fields
            .iter()
            .map(|field| {
                let value = match &field.type_info {
                    Some(type_info) => self
                        .format_value(address + field.offset, type_info, level + 1)
                        .unwrap_or_else(|e| format!("<error: {}>", e)),
                    None => "<no type info>".to_string(),
                };
                format!("{}{} = {}", inner, field.name, value)
            })
            .collect();

        format!("{{\n{}\n{}}}", lines.join(",\n"), indent(level))
    }

    /// 配列をフォーマットする
    fn format_array(
        &self,
        address: u64,
        element_type: &TypeInfo,
        length: u64,
        level: usize,
    ) -> Result<String> {
        let element_size = element_type.size();
        if length == 0 || element_size == 0 {
            return Ok("{}".to_string());
        }

        let shown = length.min(self.options.max_elements as u64);
        if is_char(element_type) {
            let bytes = self.memory.read(address, shown as usize)?;
            let text: Vec<u8> = bytes.into_iter().take_while(|&b| b != 0).collect();
            return Ok(format!("\"{}\"", escape_bytes(&text, '"')));
        }

        let mut elements = Vec::with_capacity(shown as usize);
        for i in 0..shown {
            let element = self
                .format_value(address + i * element_size, element_type, level + 1)
                .unwrap_or_else(|e| format!("<error: {}>", e));
            elements.push(element);
        }

        let mut result = format!("{{{}", self.collapse_repeats(elements).join(", "));
        if length > shown {
            result.push_str("...");
        }
        result.push('}');
        Ok(result)
    }

    /// 連続する同じ要素を `<repeats N times>` にまとめる
    fn collapse_repeats(&self, elements: Vec<String>) -> Vec<String> {
        let mut collapsed = Vec::new();
        let mut iter = elements.into_iter().peekable();
        while let Some(element) = iter.next() {
            let mut count = 1;
            while iter.peek() == Some(&element) {
                iter.next();
                count += 1;
            }
            if count >= self.options.repeat_threshold {
                collapsed.push(format!("{} <repeats {} times>", element, count));
            } else {
                collapsed.extend(std::iter::repeat(element).take(count));
            }
        }
        collapsed
    }

    /// 基本型をフォーマットする
    fn format_primitive(&self, address: u64, type_info: &TypeInfo) -> Result<String> {
        let TypeInfo::Primitive { size, encoding, .. } = type_info else {
            return Ok("<unknown type>".to_string());
        };
        if *size == 0 {
            return Ok("void".to_string());
        }

        let raw = self.read_scalar(address, *size)?;
        let formatted = match *encoding {
            Some(gimli::DW_ATE_boolean) => (raw != 0).to_string(),
            Some(gimli::DW_ATE_float) if *size == 4 => f32::from_bits(raw as u32).to_string(),
            Some(gimli::DW_ATE_float) if *size == 8 => f64::from_bits(raw).to_string(),
            Some(gimli::DW_ATE_address) => format!("0x{:x}", raw),
            Some(gimli::DW_ATE_signed_char) => format_char(sign_extend(raw, *size), raw as u8),
            Some(gimli::DW_ATE_unsigned_char) | Some(gimli::DW_ATE_UTF) if *size == 1 => {
                format_char(raw as i64, raw as u8)
            }
            Some(gimli::DW_ATE_signed) if is_char(type_info) => {
                format_char(sign_extend(raw, *size), raw as u8)
            }
            Some(gimli::DW_ATE_signed) => sign_extend(raw, *size).to_string(),
            Some(_) => raw.to_string(),
            None => format!("0x{:x}", raw),
        };
        Ok(formatted)
    }

    /// ポインタ値をフォーマットする
    fn format_pointer(&self, value: u64, pointee: Option<&TypeInfo>) -> String {
        if value == 0 {
            return "0x0".to_string();
        }
        match pointee {
            Some(TypeInfo::Subroutine) => self.format_code_address(value),
            Some(pointee) if is_char(pointee) => match self.read_c_string(value) {
                Some(text) => format!("0x{:x} \"{}\"", value, escape_bytes(&text, '"')),
                None => format!("0x{:x}", value),
            },
            _ => format!("0x{:x}", value),
        }
    }

    /// コードアドレスにシンボル名を添える
    fn format_code_address(&self, value: u64) -> String {
        match self.symbolizer.and_then(|symbolize| symbolize(value)) {
            Some(symbol) => format!("0x{:x} <{}>", value, symbol),
            None => format!("0x{:x}", value),
        }
    }

    /// NUL終端文字列を読み取る（最大要素数まで）
    fn read_c_string(&self, address: u64) -> Option<Vec<u8>> {
        let mut text = Vec::new();
        for i in 0..self.options.max_elements as u64 {
            let byte = self.memory.read_u8(address + i).ok()?;
            if byte == 0 {
                break;
            }
            text.push(byte);
        }
        Some(text)
    }

    fn read_scalar(&self, address: u64, size: u64) -> Result<u64> {
        let bytes = self.memory.read(address, size as usize)?;
        read_le(&bytes, address)
    }
}

/// 1文字型かどうか
fn is_char(type_info: &TypeInfo) -> bool {
    match type_info {
        TypeInfo::Primitive {
            name,
            size: 1,
            encoding,
        } => {
            matches!(
                *encoding,
                Some(gimli::DW_ATE_signed_char) | Some(gimli::DW_ATE_unsigned_char)
            ) || name.contains("char")
        }
        _ => false,
    }
}

/// 列挙値をフォーマットする
fn format_enum(raw: u64, size: u64, enumerators: &[Enumerator]) -> String {
    let signed = sign_extend(raw, size);
    enumerators
        .iter()
        .find(|e| e.value == signed || e.value as u64 == raw)
        .map(|e| e.name.clone())
        .unwrap_or_else(|| format!("(unknown: 0x{:x})", raw))
}

/// 文字をgdbと同じ `65 'A'` の形でフォーマットする
fn format_char(value: i64, byte: u8) -> String {
    format!("{} '{}'", value, escape_bytes(&[byte], '\''))
}

/// 表示できないバイトを8進エスケープにする
fn escape_bytes(bytes: &[u8], quote: char) -> String {
    let mut escaped = String::new();
    for &byte in bytes {
        match byte {
            b'\\' => escaped.push_str("\\\\"),
            b'\n' => escaped.push_str("\\n"),
            b'\t' => escaped.push_str("\\t"),
            b if b as char == quote => {
                escaped.push('\\');
                escaped.push(quote);
            }
            0x20..=0x7e => escaped.push(byte as char),
            _ => escaped.push_str(&format!("\\{:03o}", byte)),
        }
    }
    escaped
}

fn sign_extend(raw: u64, size: u64) -> i64 {
    match size {
        1 => raw as u8 as i8 as i64,
        2 => raw as u16 as i16 as i64,
        4 => raw as u32 as i32 as i64,
        _ => raw as i64,
    }
}

fn indent(level: usize) -> String {
    "  ".repeat(level)
}
