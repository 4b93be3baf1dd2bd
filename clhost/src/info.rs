//! 两次调用的查询协议：先以空输出取长度，再按长度分配并取值。

use crate::ErrorCode;
use bytemuck::Pod;
use std::mem::size_of;

pub(crate) fn query_with<T: Clone>(
    init: T,
    mut f: impl FnMut(Option<&mut [T]>) -> Result<usize, ErrorCode>,
) -> Result<Vec<T>, ErrorCode> {
    let len = f(None)?;
    let mut ans = vec![init; len];
    if len > 0 {
        let written = f(Some(&mut ans))?;
        ans.truncate(written)
    }
    Ok(ans)
}

#[inline]
pub(crate) fn query_bytes(
    f: impl FnMut(Option<&mut [u8]>) -> Result<usize, ErrorCode>,
) -> Result<Vec<u8>, ErrorCode> {
    query_with(0u8, f)
}

/// 以 NUL 结尾的字符串属性。
pub(crate) fn query_string(
    f: impl FnMut(Option<&mut [u8]>) -> Result<usize, ErrorCode>,
) -> Result<String, ErrorCode> {
    let mut bytes = query_bytes(f)?;
    while bytes.last() == Some(&0) {
        bytes.pop();
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// 定长标量属性，长度不符时视为无效值。
pub(crate) fn query_scalar<T: Pod>(
    f: impl FnMut(Option<&mut [u8]>) -> Result<usize, ErrorCode>,
) -> Result<T, ErrorCode> {
    let bytes = query_bytes(f)?;
    bytemuck::try_pod_read_unaligned(&bytes).map_err(|_| ErrorCode::INVALID_VALUE)
}

/// 标量数组属性。
pub(crate) fn query_array<T: Pod>(
    f: impl FnMut(Option<&mut [u8]>) -> Result<usize, ErrorCode>,
) -> Result<Vec<T>, ErrorCode> {
    let bytes = query_bytes(f)?;
    if bytes.len() % size_of::<T>() != 0 {
        return Err(ErrorCode::INVALID_VALUE);
    }
    Ok(bytes
        .chunks_exact(size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

/// 按两次调用协议写出一个属性值：`out` 为空时只报告长度，否则要求空间足够。
#[cfg(any(use_cpu, test))]
pub(crate) fn answer(bytes: &[u8], out: Option<&mut [u8]>) -> Result<usize, ErrorCode> {
    answer_with(bytes, out)
}

#[cfg(any(use_cpu, use_cl, test))]
pub(crate) fn answer_with<T: Clone>(vals: &[T], out: Option<&mut [T]>) -> Result<usize, ErrorCode> {
    match out {
        None => Ok(vals.len()),
        Some(out) if out.len() < vals.len() => Err(ErrorCode::INVALID_VALUE),
        Some(out) => {
            out[..vals.len()].clone_from_slice(vals);
            Ok(vals.len())
        }
    }
}

#[test]
fn test_two_call() {
    let value = b"clhost\0".to_vec();
    let mut calls = 0;
    let s = query_string(|out| {
        calls += 1;
        answer(&value, out)
    })
    .unwrap();
    assert_eq!(s, "clhost");
    assert_eq!(calls, 2);

    let n: u32 = query_scalar(|out| answer(&7u32.to_ne_bytes(), out)).unwrap();
    assert_eq!(n, 7);
    assert_eq!(
        query_scalar::<u64>(|out| answer(&7u32.to_ne_bytes(), out)),
        Err(ErrorCode::INVALID_VALUE)
    );

    let sizes: Vec<usize> = query_array(|out| answer(bytemuck::cast_slice(&[4usize, 2, 1]), out)).unwrap();
    assert_eq!(sizes, [4, 2, 1]);

    let mut small = [0u8; 2];
    assert_eq!(answer(&value, Some(&mut small)), Err(ErrorCode::INVALID_VALUE));
}
