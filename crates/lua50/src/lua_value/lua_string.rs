// Interned string objects and the numeric formatter/scanner.
//
// Every string in the VM is interned: the object pool keeps a global
// content-keyed table, so two strings with equal bytes are always the same
// object and value equality is handle equality.

use crate::lua_vm::lua_limits::LUAI_NUMDIGITS;

/// An immutable byte string with cached length and hash.
pub struct LuaString {
    bytes: Box<[u8]>,
    hash: u64,
}

impl LuaString {
    pub fn new(bytes: Box<[u8]>, hash: u64) -> Self {
        Self { bytes, hash }
    }

    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline(always)]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Lossy UTF-8 view for diagnostics.
    pub fn to_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

/// Largest double whose integer formatting is exact and shorter than the
/// `%.14g` path.
const INT_FMT_LIMIT: f64 = 1e15;

/// Format a number the way the runtime prints it: `%.14g`. Exact integers
/// take a fast path through `itoa`.
pub fn number_to_str(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n < 0.0 { "-inf".to_string() } else { "inf".to_string() };
    }
    if n == n.trunc() && n.abs() < INT_FMT_LIMIT {
        let mut buf = itoa::Buffer::new();
        return buf.format(n as i64).to_string();
    }
    fmt_g(n, LUAI_NUMDIGITS)
}

/// `%.<prec>g` formatting: `prec` significant digits, fixed or exponent
/// notation depending on magnitude, trailing zeros trimmed.
fn fmt_g(n: f64, prec: usize) -> String {
    // Render in exponent form to learn the decimal exponent.
    let e = format!("{:.*e}", prec - 1, n);
    let (mantissa, exp) = match e.split_once('e') {
        Some(parts) => parts,
        None => return e,
    };
    let exp: i32 = exp.parse().unwrap_or(0);
    if exp < -4 || exp >= prec as i32 {
        // exponent notation: trim mantissa zeros, C-style two-digit exponent
        let mantissa = trim_zeros(mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exp.abs())
    } else {
        // fixed notation with (prec - 1 - exp) fractional digits
        let frac = (prec as i32 - 1 - exp).max(0) as usize;
        let fixed = format!("{:.*}", frac, n);
        trim_zeros(&fixed).to_string()
    }
}

/// Remove trailing zeros (and a trailing dot) from a decimal rendering.
fn trim_zeros(s: &str) -> &str {
    if !s.contains('.') {
        return s;
    }
    let s = s.trim_end_matches('0');
    s.strip_suffix('.').unwrap_or(s)
}

/// Parse a byte string as a number: optional surrounding whitespace, then
/// either a decimal literal (sign, fraction, exponent) or a hexadecimal
/// `0x` integer. Trailing garbage fails the parse.
pub fn str_to_number(bytes: &[u8]) -> Option<f64> {
    let s = std::str::from_utf8(bytes).ok()?;
    let s = s.trim_matches(|c: char| c.is_ascii_whitespace());
    if s.is_empty() {
        return None;
    }
    // hexadecimal constants (strtoul behavior in the scanner)
    let (neg, body) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        if hex.is_empty() {
            return None;
        }
        let v = u64::from_str_radix(hex, 16).ok()? as f64;
        return Some(if neg { -v } else { v });
    }
    // reject forms Rust accepts but the scanner does not
    if s.contains(|c: char| c.is_ascii_alphabetic() && !matches!(c, 'e' | 'E'))
        || s.contains("--")
    {
        return None;
    }
    s.parse::<f64>().ok()
}
