pub mod analyze;
pub mod deps;
pub mod patch;

use anyhow::{bail, Result};

/// Parse a hex RVA like `0x1000` (the `0x` prefix is optional).
pub fn parse_hex_rva(value: &str) -> Result<u32> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    match u32::from_str_radix(digits, 16) {
        Ok(rva) => Ok(rva),
        Err(_) => bail!("invalid hex address: {value}"),
    }
}

/// Parse a permission triple like `RWX`, `R-X` or `RW-`.
pub fn parse_permissions(perms: &str) -> Result<(bool, bool, bool)> {
    let chars: Vec<char> = perms.to_uppercase().chars().collect();
    if chars.len() != 3 {
        bail!("permissions must be three characters, e.g. R-X or RWX");
    }

    let expect = |index: usize, letter: char| -> Result<bool> {
        match chars[index] {
            c if c == letter => Ok(true),
            '-' => Ok(false),
            other => bail!("unexpected permission character '{other}'"),
        }
    };

    Ok((expect(0, 'R')?, expect(1, 'W')?, expect(2, 'X')?))
}
