//! String library
//!
//! String values index this table, so `s:upper()` works as in Lua. Positions
//! are byte positions; slices that split a UTF-8 sequence are repaired lossily.

use crate::runtime::value::{format_general, Value};
use crate::std::{arg, check_int, check_number, check_str, opt_int, NativeContext, NativeExport, NativeOutcome, StdModule};
use crate::vm::{bad_argument, VMError, VMResult};

// ============================================================================
// StringModule - StdModule Implementation
// ============================================================================

/// String module implementation.
pub struct StringModule;

impl StdModule for StringModule {
    fn module_path(&self) -> &str {
        "string"
    }

    fn exports(&self) -> Vec<NativeExport> {
        vec![
            NativeExport::new("len", "string.len", "(s) -> integer", native_len),
            NativeExport::new("sub", "string.sub", "(s, i, j?) -> string", native_sub),
            NativeExport::new("upper", "string.upper", "(s) -> string", native_upper),
            NativeExport::new("lower", "string.lower", "(s) -> string", native_lower),
            NativeExport::new("rep", "string.rep", "(s, n, sep?) -> string", native_rep),
            NativeExport::new(
                "reverse",
                "string.reverse",
                "(s) -> string",
                native_reverse,
            ),
            NativeExport::new("byte", "string.byte", "(s, i?, j?) -> ...", native_byte),
            NativeExport::new("char", "string.char", "(...) -> string", native_char),
            NativeExport::new(
                "format",
                "string.format",
                "(fmt, ...) -> string",
                native_format,
            ),
        ]
    }
}

/// Singleton instance for the string library.
pub const STRING_MODULE: StringModule = StringModule;

// ============================================================================
// Native function implementations
// ============================================================================

fn text(s: String) -> VMResult<NativeOutcome> {
    Ok(NativeOutcome::Return(vec![Value::str(&s)]))
}

/// Translate Lua's relative string positions into a 0-based byte range
fn byte_range(
    len: usize,
    i: i64,
    j: i64,
) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if i < 0 { (len + i + 1).max(1) } else { i.max(1) };
    let end = if j < 0 { len + j + 1 } else { j.min(len) };
    if start > end {
        None
    } else {
        Some(((start - 1) as usize, end as usize))
    }
}

/// Native implementation: len - byte length
fn native_len(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let s = check_str(args, 0, "len")?;
    Ok(NativeOutcome::Return(vec![Value::Int(s.len() as i64)]))
}

/// Native implementation: sub - substring by byte positions
fn native_sub(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let s = check_str(args, 0, "sub")?;
    let i = opt_int(args, 1, "sub", 1)?;
    let j = opt_int(args, 2, "sub", -1)?;
    match byte_range(s.len(), i, j) {
        Some((start, end)) => text(String::from_utf8_lossy(&s.as_bytes()[start..end]).into_owned()),
        None => text(String::new()),
    }
}

fn native_upper(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    text(check_str(args, 0, "upper")?.to_uppercase())
}

fn native_lower(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    text(check_str(args, 0, "lower")?.to_lowercase())
}

/// Native implementation: rep - repeat with optional separator
fn native_rep(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let s = check_str(args, 0, "rep")?;
    let n = check_int(args, 1, "rep")?;
    let sep = match args.get(2) {
        None | Some(Value::Nil) => String::new(),
        Some(_) => check_str(args, 2, "rep")?,
    };
    if n <= 0 {
        return text(String::new());
    }
    let n = n as usize;
    let total = s
        .len()
        .saturating_mul(n)
        .saturating_add(sep.len().saturating_mul(n - 1));
    if total == 0 {
        return text(String::new());
    }
    if total > (1 << 28) {
        return Err(VMError::runtime("resulting string too large"));
    }
    let mut out = String::with_capacity(total);
    for i in 0..n {
        if i > 0 {
            out.push_str(&sep);
        }
        out.push_str(&s);
    }
    text(out)
}

fn native_reverse(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    text(check_str(args, 0, "reverse")?.chars().rev().collect())
}

/// Native implementation: byte - byte values of `s[i..j]`
fn native_byte(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let s = check_str(args, 0, "byte")?;
    let i = opt_int(args, 1, "byte", 1)?;
    let j = opt_int(args, 2, "byte", i)?;
    let values = match byte_range(s.len(), i, j) {
        Some((start, end)) => s.as_bytes()[start..end]
            .iter()
            .map(|b| Value::Int(*b as i64))
            .collect(),
        None => Vec::new(),
    };
    Ok(NativeOutcome::Return(values))
}

/// Native implementation: char - string from byte values
fn native_char(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let mut bytes = Vec::with_capacity(args.len());
    for n in 0..args.len() {
        let code = check_int(args, n, "char")?;
        let byte = u8::try_from(code).map_err(|_| bad_argument(n + 1, "char", "value out of range"))?;
        bytes.push(byte);
    }
    text(String::from_utf8_lossy(&bytes).into_owned())
}

/// One parsed `%` directive
#[derive(Debug, Default)]
struct Directive {
    left: bool,
    plus: bool,
    space: bool,
    zero: bool,
    alt: bool,
    width: usize,
    precision: Option<usize>,
}

impl Directive {
    fn pad(
        &self,
        body: String,
        numeric: bool,
    ) -> String {
        let len = body.chars().count();
        if len >= self.width {
            return body;
        }
        let fill = self.width - len;
        if self.left {
            format!("{}{}", body, " ".repeat(fill))
        } else if self.zero && numeric {
            let (sign, digits) = match body.chars().next() {
                Some(c @ ('-' | '+' | ' ')) => (c.to_string(), body[1..].to_string()),
                _ => (String::new(), body),
            };
            format!("{}{}{}", sign, "0".repeat(fill), digits)
        } else {
            format!("{}{}", " ".repeat(fill), body)
        }
    }

    fn sign(
        &self,
        negative: bool,
    ) -> &'static str {
        if negative {
            "-"
        } else if self.plus {
            "+"
        } else if self.space {
            " "
        } else {
            ""
        }
    }
}

/// Native implementation: format - `%d %i %u %c %x %X %o %e %f %g %q %s %%`
fn native_format(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let fmt = check_str(args, 0, "format")?;
    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.chars().peekable();
    let mut next_arg = 1;

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }

        let mut d = Directive::default();
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => d.left = true,
                '+' => d.plus = true,
                ' ' => d.space = true,
                '0' => d.zero = true,
                '#' => d.alt = true,
                _ => break,
            }
            chars.next();
        }
        while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
            d.width = d.width * 10 + digit as usize;
            chars.next();
        }
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut precision = 0;
            while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
                precision = precision * 10 + digit as usize;
                chars.next();
            }
            d.precision = Some(precision);
        }

        let conv = chars
            .next()
            .ok_or_else(|| VMError::runtime("invalid conversion '%' to 'format'"))?;
        let n = next_arg;
        next_arg += 1;
        if n >= args.len() && conv != '%' {
            return Err(bad_argument(n + 1, "format", "no value"));
        }

        let piece = match conv {
            'd' | 'i' | 'u' => {
                let i = check_int(args, n, "format")?;
                let mut digits = i.unsigned_abs().to_string();
                if let Some(p) = d.precision {
                    while digits.len() < p {
                        digits.insert(0, '0');
                    }
                }
                d.pad(format!("{}{}", d.sign(i < 0), digits), d.precision.is_none())
            }
            'c' => {
                let code = check_int(args, n, "format")?;
                let ch = u8::try_from(code).map(char::from).unwrap_or('\u{fffd}');
                d.pad(ch.to_string(), false)
            }
            'x' | 'X' | 'o' => {
                let i = check_int(args, n, "format")?;
                let body = match conv {
                    'x' => format!("{}{:x}", if d.alt && i != 0 { "0x" } else { "" }, i),
                    'X' => format!("{}{:X}", if d.alt && i != 0 { "0X" } else { "" }, i),
                    _ => format!("{}{:o}", if d.alt { "0" } else { "" }, i),
                };
                d.pad(body, true)
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
                let x = check_number(args, n, "format")?.as_f64().unwrap_or(f64::NAN);
                let precision = d.precision.unwrap_or(6);
                let body = if !x.is_finite() {
                    let s = if x.is_nan() { "nan" } else { "inf" };
                    format!("{}{}", d.sign(x.is_sign_negative() && !x.is_nan()), s)
                } else {
                    let magnitude = match conv {
                        'f' | 'F' => format!("{:.*}", precision, x.abs()),
                        'e' | 'E' => c_exponent(x.abs(), precision),
                        _ => format_general(x.abs(), if precision == 0 { 1 } else { precision }),
                    };
                    format!("{}{}", d.sign(x.is_sign_negative() && x != 0.0), magnitude)
                };
                let body = if conv.is_ascii_uppercase() { body.to_uppercase() } else { body };
                d.pad(body, x.is_finite())
            }
            'q' => quote(&arg(args, n))?,
            's' => {
                let s = arg(args, n).to_string();
                let s = match d.precision {
                    Some(p) => s.chars().take(p).collect(),
                    None => s,
                };
                d.pad(s, false)
            }
            other => {
                return Err(VMError::Runtime(format!(
                    "invalid conversion '%{}' to 'format'",
                    other
                )))
            }
        };
        out.push_str(&piece);
    }
    text(out)
}

/// `%e` with C's two-digit exponent
fn c_exponent(
    x: f64,
    precision: usize,
) -> String {
    let s = format!("{:.*e}", precision, x);
    match s.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exponent.abs())
        }
        None => s,
    }
}

/// `%q`: a literal that reads back as the same value
fn quote(value: &Value) -> VMResult<String> {
    match value {
        Value::Str(s) => {
            let mut out = String::with_capacity(s.len() + 2);
            out.push('"');
            for c in s.chars() {
                match c {
                    '"' => out.push_str("\\\""),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    '\0' => out.push_str("\\0"),
                    other => out.push(other),
                }
            }
            out.push('"');
            Ok(out)
        }
        Value::Int(i) => Ok(i.to_string()),
        Value::Float(f) => Ok(if f.is_finite() {
            format!("{:e}", f)
        } else if f.is_nan() {
            "(0/0)".to_string()
        } else if *f > 0.0 {
            "1e9999".to_string()
        } else {
            "-1e9999".to_string()
        }),
        Value::Nil | Value::Bool(_) => Ok(value.to_string()),
        _ => Err(bad_argument(2, "format", "value has no literal form")),
    }
}
