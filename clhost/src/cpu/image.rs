//! 像素编解码和按步长的区域复制。

use crate::{ChannelOrder, ChannelType, ErrorCode, FillColor, ImageFormat, MemObjectType};
use half::f16;
use std::ptr::copy;

/// 模拟设备支持的图像格式。
pub(super) fn supported_formats(ty: MemObjectType) -> Vec<ImageFormat> {
    use ChannelOrder as O;
    use ChannelType as T;
    if !ty.is_image() {
        return vec![];
    }
    let mut ans = vec![];
    for order in [O::RGBA, O::R, O::RG, O::A, O::RA] {
        for ty in ChannelType::ALL {
            ans.push(ImageFormat::new(order, ty))
        }
    }
    for ty in [T::UnormInt8, T::SnormInt8, T::SignedInt8, T::UnsignedInt8] {
        ans.push(ImageFormat::new(O::BGRA, ty))
    }
    for order in [O::Intensity, O::Luminance] {
        for ty in [
            T::UnormInt8,
            T::UnormInt16,
            T::SnormInt8,
            T::SnormInt16,
            T::HalfFloat,
            T::Float,
        ] {
            ans.push(ImageFormat::new(order, ty))
        }
    }
    ans
}

/// 把 RGBA 颜色编码成一个像素。颜色的变体必须与通道类型匹配。
pub(super) fn encode(format: ImageFormat, color: FillColor) -> Result<Vec<u8>, ErrorCode> {
    let ty = format.data_type;
    let mut ans = Vec::with_capacity(format.pixel_size());
    for &c in format.order.components() {
        match (color, ty) {
            (FillColor::Float(v), _) if ty.is_normalized() => {
                let x = v[c];
                match ty {
                    ChannelType::UnormInt8 => ans.push(unorm(x, u8::MAX as _) as u8),
                    ChannelType::UnormInt16 => {
                        ans.extend_from_slice(&(unorm(x, u16::MAX as _) as u16).to_ne_bytes())
                    }
                    ChannelType::SnormInt8 => ans.extend_from_slice(&(snorm(x, i8::MAX as _) as i8).to_ne_bytes()),
                    ChannelType::SnormInt16 => {
                        ans.extend_from_slice(&(snorm(x, i16::MAX as _) as i16).to_ne_bytes())
                    }
                    _ => unreachable!(),
                }
            }
            (FillColor::Float(v), ChannelType::HalfFloat) => {
                ans.extend_from_slice(&f16::from_f32(v[c]).to_ne_bytes())
            }
            (FillColor::Float(v), ChannelType::Float) => ans.extend_from_slice(&v[c].to_ne_bytes()),
            (FillColor::Int(v), ChannelType::SignedInt8) => {
                ans.extend_from_slice(&(v[c].clamp(i8::MIN as _, i8::MAX as _) as i8).to_ne_bytes())
            }
            (FillColor::Int(v), ChannelType::SignedInt16) => ans.extend_from_slice(
                &(v[c].clamp(i16::MIN as _, i16::MAX as _) as i16).to_ne_bytes(),
            ),
            (FillColor::Int(v), ChannelType::SignedInt32) => ans.extend_from_slice(&v[c].to_ne_bytes()),
            (FillColor::Uint(v), ChannelType::UnsignedInt8) => ans.push(v[c].min(u8::MAX as _) as u8),
            (FillColor::Uint(v), ChannelType::UnsignedInt16) => {
                ans.extend_from_slice(&(v[c].min(u16::MAX as _) as u16).to_ne_bytes())
            }
            (FillColor::Uint(v), ChannelType::UnsignedInt32) => ans.extend_from_slice(&v[c].to_ne_bytes()),
            _ => return Err(ErrorCode::INVALID_VALUE),
        }
    }
    Ok(ans)
}

#[inline]
fn unorm(x: f32, max: f32) -> f32 {
    (x.clamp(0., 1.) * max).round()
}

#[inline]
fn snorm(x: f32, max: f32) -> f32 {
    (x.clamp(-1., 1.) * max).round()
}

/// 把一个像素解码成 RGBA 颜色。缺失的颜色分量为 0，缺失的 alpha 为 1。
pub(super) fn decode(format: ImageFormat, pixel: &[u8]) -> FillColor {
    let ty = format.data_type;
    let size = ty.size();
    let channel = |i: usize| &pixel[i * size..][..size];
    let order = format.order;
    let mut float = [0., 0., 0., 1.];
    let mut int = [0, 0, 0, 1];
    let mut uint = [0, 0, 0, 1];
    for (i, &c) in order.components().iter().enumerate() {
        let bytes = channel(i);
        match ty {
            ChannelType::UnormInt8 => float[c] = bytes[0] as f32 / u8::MAX as f32,
            ChannelType::UnormInt16 => {
                float[c] = u16::from_ne_bytes([bytes[0], bytes[1]]) as f32 / u16::MAX as f32
            }
            ChannelType::SnormInt8 => float[c] = (bytes[0] as i8 as f32 / i8::MAX as f32).max(-1.),
            ChannelType::SnormInt16 => {
                float[c] = (i16::from_ne_bytes([bytes[0], bytes[1]]) as f32 / i16::MAX as f32).max(-1.)
            }
            ChannelType::HalfFloat => float[c] = f16::from_ne_bytes([bytes[0], bytes[1]]).to_f32(),
            ChannelType::Float => float[c] = f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            ChannelType::SignedInt8 => int[c] = bytes[0] as i8 as i32,
            ChannelType::SignedInt16 => int[c] = i16::from_ne_bytes([bytes[0], bytes[1]]) as i32,
            ChannelType::SignedInt32 => int[c] = i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            ChannelType::UnsignedInt8 => uint[c] = bytes[0] as u32,
            ChannelType::UnsignedInt16 => uint[c] = u16::from_ne_bytes([bytes[0], bytes[1]]) as u32,
            ChannelType::UnsignedInt32 => uint[c] = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }
    match order {
        ChannelOrder::Intensity => float = [float[0]; 4],
        ChannelOrder::Luminance => float = [float[0], float[0], float[0], 1.],
        _ => {}
    }
    if ty.is_signed_int() {
        FillColor::Int(int)
    } else if ty.is_unsigned_int() {
        FillColor::Uint(uint)
    } else {
        FillColor::Float(float)
    }
}

/// 一端的字节布局：起始地址和 y、z 方向的步长。
#[derive(Clone, Copy, Debug)]
pub(super) struct Layout {
    pub ptr: *mut u8,
    pub pitches: [usize; 2],
}

impl Layout {
    /// 区域原点的地址，`x` 以字节计。
    #[inline]
    pub fn at(self, [x, y, z]: [usize; 3]) -> Self {
        Self {
            ptr: unsafe { self.ptr.add(z * self.pitches[1] + y * self.pitches[0] + x) },
            ..self
        }
    }
}

/// 逐行复制 `row` 字节宽、`rows` × `slices` 行的区域，允许重叠。
///
/// # Safety
///
/// 两端按各自步长覆盖的范围都必须有效。
pub(super) unsafe fn copy_region(src: Layout, dst: Layout, row: usize, rows: usize, slices: usize) {
    for z in 0..slices {
        for y in 0..rows {
            copy(
                src.ptr.add(z * src.pitches[1] + y * src.pitches[0]),
                dst.ptr.add(z * dst.pitches[1] + y * dst.pitches[0]),
                row,
            )
        }
    }
}

/// 用同一个像素填充区域。
///
/// # Safety
///
/// `dst` 按步长覆盖的范围必须有效。
pub(super) unsafe fn fill_region(dst: Layout, pixel: &[u8], width: usize, rows: usize, slices: usize) {
    for z in 0..slices {
        for y in 0..rows {
            let line = dst.ptr.add(z * dst.pitches[1] + y * dst.pitches[0]);
            for x in 0..width {
                line.add(x * pixel.len())
                    .copy_from_nonoverlapping(pixel.as_ptr(), pixel.len())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_encode() {
        let rgba8 = ImageFormat::new(ChannelOrder::RGBA, ChannelType::UnsignedInt8);
        assert_eq!(
            encode(rgba8, FillColor::Uint([255, 0, 0, 300])).unwrap(),
            [255, 0, 0, 255]
        );
        assert_eq!(
            encode(rgba8, FillColor::Float([1., 0., 0., 1.])),
            Err(ErrorCode::INVALID_VALUE)
        );

        let bgra = ImageFormat::new(ChannelOrder::BGRA, ChannelType::UnormInt8);
        assert_eq!(
            encode(bgra, FillColor::Float([1., 0.5, 0., 2.])).unwrap(),
            [0, 128, 255, 255]
        );

        let snorm = ImageFormat::new(ChannelOrder::R, ChannelType::SnormInt8);
        assert_eq!(encode(snorm, FillColor::Float([-3.; 4])).unwrap(), [(-127i8) as u8]);

        let half = ImageFormat::new(ChannelOrder::RG, ChannelType::HalfFloat);
        let bytes = encode(half, FillColor::Float([1.5, -2., 0., 0.])).unwrap();
        assert_eq!(decode(half, &bytes), FillColor::Float([1.5, -2., 0., 1.]));
    }

    #[test]
    fn test_decode() {
        let int16 = ImageFormat::new(ChannelOrder::RA, ChannelType::SignedInt16);
        let bytes = encode(int16, FillColor::Int([-40000, 9, 9, 7])).unwrap();
        assert_eq!(decode(int16, &bytes), FillColor::Int([i16::MIN as _, 0, 0, 7]));

        let lum = ImageFormat::new(ChannelOrder::Luminance, ChannelType::Float);
        let bytes = encode(lum, FillColor::Float([0.25, 0., 0., 0.])).unwrap();
        assert_eq!(decode(lum, &bytes), FillColor::Float([0.25, 0.25, 0.25, 1.]));
    }

    #[test]
    fn test_copy_region() {
        let mut src = (0..16u8).collect::<Vec<_>>();
        let mut dst = vec![0u8; 4];
        let src = Layout {
            ptr: src.as_mut_ptr(),
            pitches: [4, 16],
        };
        let dst_layout = Layout {
            ptr: dst.as_mut_ptr(),
            pitches: [2, 4],
        };
        unsafe { copy_region(src.at([1, 1, 0]), dst_layout, 2, 2, 1) };
        assert_eq!(dst, [5, 6, 9, 10]);

        unsafe { fill_region(dst_layout, &[7], 1, 2, 1) };
        assert_eq!(dst, [7, 6, 7, 10]);
    }
}
