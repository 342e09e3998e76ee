use anyhow::{bail, ensure, Result};
use codec::Column;

/// Row order that sorts by `primary`, then `secondary`, ties kept in their
/// original order.
///
/// Entry `i` of the result is the original row that moves to position `i`.
///
/// # Errors
///
/// Fails if `secondary` has a different length than `primary`.
pub fn permutation(primary: &[u64], secondary: Option<&[u64]>) -> Result<Vec<usize>> {
    let mut perm: Vec<usize> = (0..primary.len()).collect();
    match secondary {
        Some(t) => {
            ensure!(
                t.len() == primary.len(),
                "sort columns differ in length ({} and {})",
                primary.len(),
                t.len()
            );
            perm.sort_by_key(|&i| (primary[i], t[i]));
        }
        None => perm.sort_by_key(|&i| primary[i]),
    }
    Ok(perm)
}

/// `true` if `perm` leaves every row where it is.
#[must_use]
pub fn is_identity(perm: &[usize]) -> bool {
    perm.iter().enumerate().all(|(i, &p)| i == p)
}

/// Reorders `bytes`, a run of `width`-byte records, by `perm`.
pub fn reorder_fixed(bytes: &[u8], width: usize, perm: &[usize]) -> Result<Vec<u8>> {
    ensure!(width > 0, "record width must be positive");
    if bytes.len() % width != 0 {
        bail!(
            "{} bytes is not a whole number of {width}-byte records",
            bytes.len()
        );
    }
    let rows = bytes.len() / width;
    ensure!(
        rows == perm.len(),
        "column has {rows} rows, permutation has {}",
        perm.len()
    );

    let mut out = Vec::with_capacity(bytes.len());
    for &i in perm {
        ensure!(i < rows, "permutation index {i} out of range for {rows} rows");
        out.extend_from_slice(&bytes[i * width..(i + 1) * width]);
    }
    Ok(out)
}

/// Reorders a decoded variable-width column by `perm`.
pub fn reorder_values(column: &Column, perm: &[usize]) -> Result<Column> {
    Ok(column.permute(perm)?)
}
