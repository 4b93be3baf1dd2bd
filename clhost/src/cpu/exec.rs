//! 核函数在模拟设备上的执行。
//!
//! 核函数的宿主实现以工作组为单位被调用，组内逐个遍历工作项。
//! 组内同步点可以表达为先后两次遍历。

use super::{
    blob::Blob,
    image::{decode, encode},
    object::{ArgValue, ImageInfo, MemState},
    pool::LocalPool,
};
use crate::{AddressingMode, FillColor, FilterMode, ImageFormat};
use bytemuck::Pod;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use std::{
    marker::PhantomData,
    mem::size_of,
    ptr::{read_unaligned, write_unaligned},
};

/// 核函数的宿主实现。
pub type KernelFn = dyn Fn(&WorkGroup, &KernelArgs) + Send + Sync;

/// 采样器的设置。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SamplerDesc {
    pub normalized_coords: bool,
    pub addressing: AddressingMode,
    pub filter: FilterMode,
}

/// 一次发射的工作划分，尺寸已经补足到 3 维。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(super) struct Geometry {
    pub work_dim: u32,
    pub offset: [usize; 3],
    pub local: [usize; 3],
    pub groups: [usize; 3],
}

/// 正在执行的工作组。
#[derive(Clone, Copy, Debug)]
pub struct WorkGroup {
    geometry: Geometry,
    id: [usize; 3],
}

impl WorkGroup {
    #[inline]
    pub fn work_dim(&self) -> u32 {
        self.geometry.work_dim
    }

    #[inline]
    pub fn group_id(&self, dim: usize) -> usize {
        pick(&self.id, dim, 0)
    }

    #[inline]
    pub fn num_groups(&self, dim: usize) -> usize {
        pick(&self.geometry.groups, dim, 1)
    }

    #[inline]
    pub fn local_size(&self, dim: usize) -> usize {
        pick(&self.geometry.local, dim, 1)
    }

    #[inline]
    pub fn global_size(&self, dim: usize) -> usize {
        self.num_groups(dim) * self.local_size(dim)
    }

    #[inline]
    pub fn global_offset(&self, dim: usize) -> usize {
        pick(&self.geometry.offset, dim, 0)
    }

    /// 组内工作项数。
    #[inline]
    pub fn len(&self) -> usize {
        self.geometry.local.iter().product()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按第 0 维最快变化的顺序遍历组内工作项。
    pub fn items(&self) -> impl Iterator<Item = WorkItem> + '_ {
        let [lx, ly, _] = self.geometry.local;
        (0..self.len()).map(move |i| {
            let local = [i % lx, i / lx % ly, i / lx / ly];
            let mut global = [0; 3];
            for d in 0..3 {
                global[d] = self.geometry.offset[d] + self.id[d] * self.geometry.local[d] + local[d]
            }
            WorkItem { global, local }
        })
    }
}

/// 一个工作项的坐标。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct WorkItem {
    global: [usize; 3],
    local: [usize; 3],
}

impl WorkItem {
    /// 全局编号，包含全局偏移。
    #[inline]
    pub fn global_id(&self, dim: usize) -> usize {
        pick(&self.global, dim, 0)
    }

    #[inline]
    pub fn local_id(&self, dim: usize) -> usize {
        pick(&self.local, dim, 0)
    }
}

#[inline]
fn pick(vals: &[usize; 3], dim: usize, default: usize) -> usize {
    vals.get(dim).copied().unwrap_or(default)
}

/// 发射时捕获的参数，局部存储按工作组分配。
///
/// 访问方法在参数种类不符或越界时恐慌，命令因此以 `OUT_OF_RESOURCES` 失败。
pub struct KernelArgs<'a> {
    values: &'a [ArgValue],
    locals: Vec<Option<Blob>>,
}

impl KernelArgs<'_> {
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 全局或常量存储参数。绑定为空时视图长度为 0。
    pub fn global<T: Pod>(&self, index: usize) -> MemView<T> {
        match &self.values[index] {
            ArgValue::Mem(Some(mem)) => MemView::new(mem.storage.ptr(), mem.size),
            ArgValue::Mem(None) => MemView::new(std::ptr::NonNull::dangling().as_ptr(), 0),
            arg => panic!("arg {index} is not a buffer: {arg:?}"),
        }
    }

    /// 当前工作组的局部存储参数。
    pub fn local<T: Pod>(&self, index: usize) -> MemView<T> {
        match &self.locals[index] {
            Some(blob) => MemView::new(blob.as_ptr(), blob.len()),
            None => panic!("arg {index} is not local memory"),
        }
    }

    pub fn scalar<T: Pod>(&self, index: usize) -> T {
        match &self.values[index] {
            ArgValue::Bytes(bytes) => bytemuck::pod_read_unaligned(bytes),
            arg => panic!("arg {index} is not a value: {arg:?}"),
        }
    }

    pub fn image(&self, index: usize) -> ImageView {
        match &self.values[index] {
            ArgValue::Image(mem, info) => ImageView { mem, info: *info },
            arg => panic!("arg {index} is not an image: {arg:?}"),
        }
    }

    pub fn sampler(&self, index: usize) -> SamplerDesc {
        match &self.values[index] {
            ArgValue::Sampler(desc) => *desc,
            arg => panic!("arg {index} is not a sampler: {arg:?}"),
        }
    }
}

/// 存储的类型化视图，读写都做边界检查。
pub struct MemView<'a, T> {
    ptr: *mut u8,
    len: usize,
    _phantom: PhantomData<&'a T>,
}

impl<T: Pod> MemView<'_, T> {
    #[inline]
    fn new(ptr: *mut u8, size: usize) -> Self {
        Self {
            ptr,
            len: size / size_of::<T>(),
            _phantom: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn get(&self, i: usize) -> T {
        assert!(i < self.len, "index {i} out of bounds {}", self.len);
        unsafe { read_unaligned(self.ptr.cast::<T>().add(i)) }
    }

    #[inline]
    pub fn set(&self, i: usize, val: T) {
        assert!(i < self.len, "index {i} out of bounds {}", self.len);
        unsafe { write_unaligned(self.ptr.cast::<T>().add(i), val) }
    }
}

/// 图像参数的像素视图，坐标按区域计，数组图像的层折叠进高或深。
pub struct ImageView<'a> {
    mem: &'a MemState,
    info: ImageInfo,
}

impl ImageView<'_> {
    #[inline]
    pub fn format(&self) -> ImageFormat {
        self.info.format
    }

    #[inline]
    pub fn region(&self) -> [usize; 3] {
        self.info.desc.region()
    }

    fn offset(&self, [x, y, z]: [usize; 3]) -> usize {
        let [w, h, d] = self.region();
        assert!(x < w && y < h && z < d, "pixel {:?} out of {:?}", [x, y, z], [w, h, d]);
        let pixel = self.format().pixel_size();
        ((z * h + y) * w + x) * pixel
    }

    pub fn read(&self, coord: [usize; 3]) -> FillColor {
        let offset = self.offset(coord);
        let pixel = self.format().pixel_size();
        let bytes = unsafe { std::slice::from_raw_parts(self.mem.storage.ptr().add(offset), pixel) };
        decode(self.format(), bytes)
    }

    pub fn write(&self, coord: [usize; 3], color: FillColor) {
        let offset = self.offset(coord);
        let bytes = match encode(self.format(), color) {
            Ok(bytes) => bytes,
            Err(_) => panic!("{color:?} does not match {:?}", self.format()),
        };
        unsafe {
            self.mem
                .storage
                .ptr()
                .add(offset)
                .copy_from_nonoverlapping(bytes.as_ptr(), bytes.len())
        }
    }
}

/// 在当前线程池中并行执行所有工作组。
pub(super) fn run(
    body: &(dyn Fn(&WorkGroup, &KernelArgs) + Sync),
    geometry: Geometry,
    values: &[ArgValue],
) {
    let pools = values
        .iter()
        .map(|arg| match arg {
            ArgValue::Local(size) => Some(LocalPool::new(*size)),
            _ => None,
        })
        .collect::<Vec<_>>();
    let [gx, gy, gz] = geometry.groups;
    (0..gx * gy * gz).into_par_iter().for_each(|i| {
        let group = WorkGroup {
            geometry,
            id: [i % gx, i / gx % gy, i / gx / gy],
        };
        let args = KernelArgs {
            values,
            locals: pools
                .iter()
                .map(|pool| pool.as_ref().map(LocalPool::take))
                .collect(),
        };
        body(&group, &args);
        for (pool, blob) in pools.iter().zip(args.locals) {
            if let (Some(pool), Some(blob)) = (pool, blob) {
                pool.put(blob)
            }
        }
    });
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_items() {
        let geometry = Geometry {
            work_dim: 2,
            offset: [10, 0, 0],
            local: [2, 3, 1],
            groups: [4, 2, 1],
        };
        let group = WorkGroup {
            geometry,
            id: [1, 1, 0],
        };
        assert_eq!(group.len(), 6);
        assert_eq!(group.global_size(0), 8);
        assert_eq!(group.global_size(5), 1);
        let items = group.items().collect::<Vec<_>>();
        assert_eq!(items[0].global_id(0), 12);
        assert_eq!(items[0].global_id(1), 3);
        assert_eq!(items[3].local_id(0), 1);
        assert_eq!(items[3].local_id(1), 1);
        assert_eq!(items[5].global_id(1), 5);
        assert_eq!(items[5].local_id(7), 0);
    }

    #[test]
    fn test_run() {
        let geometry = Geometry {
            work_dim: 1,
            offset: [0; 3],
            local: [4, 1, 1],
            groups: [3, 1, 1],
        };
        let values = [ArgValue::Bytes(7u32.to_ne_bytes().to_vec()), ArgValue::Local(16)];
        let out = std::sync::Mutex::new(vec![0u32; 12]);
        run(
            &|group, args| {
                let k = args.scalar::<u32>(0);
                let scratch = args.local::<u32>(1);
                assert_eq!(scratch.len(), 4);
                for item in group.items() {
                    scratch.set(item.local_id(0), item.global_id(0) as u32 * k)
                }
                let mut out = out.lock().unwrap();
                for item in group.items() {
                    out[item.global_id(0)] = scratch.get(item.local_id(0))
                }
            },
            geometry,
            &values,
        );
        let out = out.into_inner().unwrap();
        assert!(out.iter().enumerate().all(|(i, &x)| x == i as u32 * 7));
    }
}
