use std::{
    fmt,
    sync::atomic::{
        AtomicI32,
        Ordering::{Acquire, Release},
    },
};

/// 原生运行时返回的状态码。
///
/// 0 表示成功，负数表示错误。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct ErrorCode(pub i32);

macro_rules! codes {
    ($( $name:ident = $value:expr; )+) => {
        impl ErrorCode {
            $( pub const $name: Self = Self($value); )+

            /// 状态码的符号名。
            pub fn name(self) -> Option<&'static str> {
                match self.0 {
                    $( $value => Some(stringify!($name)), )+
                    _ => None,
                }
            }
        }
    };
}

codes! {
    SUCCESS                                   =   0;
    DEVICE_NOT_FOUND                          =  -1;
    DEVICE_NOT_AVAILABLE                      =  -2;
    COMPILER_NOT_AVAILABLE                    =  -3;
    MEM_OBJECT_ALLOCATION_FAILURE             =  -4;
    OUT_OF_RESOURCES                          =  -5;
    OUT_OF_HOST_MEMORY                        =  -6;
    PROFILING_INFO_NOT_AVAILABLE              =  -7;
    MEM_COPY_OVERLAP                          =  -8;
    IMAGE_FORMAT_MISMATCH                     =  -9;
    IMAGE_FORMAT_NOT_SUPPORTED                = -10;
    BUILD_PROGRAM_FAILURE                     = -11;
    MAP_FAILURE                               = -12;
    MISALIGNED_SUB_BUFFER_OFFSET              = -13;
    EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST = -14;
    COMPILE_PROGRAM_FAILURE                   = -15;
    LINKER_NOT_AVAILABLE                      = -16;
    LINK_PROGRAM_FAILURE                      = -17;
    INVALID_VALUE                             = -30;
    INVALID_DEVICE_TYPE                       = -31;
    INVALID_PLATFORM                          = -32;
    INVALID_DEVICE                            = -33;
    INVALID_CONTEXT                           = -34;
    INVALID_QUEUE_PROPERTIES                  = -35;
    INVALID_COMMAND_QUEUE                     = -36;
    INVALID_HOST_PTR                          = -37;
    INVALID_MEM_OBJECT                        = -38;
    INVALID_IMAGE_FORMAT_DESCRIPTOR           = -39;
    INVALID_IMAGE_SIZE                        = -40;
    INVALID_SAMPLER                           = -41;
    INVALID_BINARY                            = -42;
    INVALID_BUILD_OPTIONS                     = -43;
    INVALID_PROGRAM                           = -44;
    INVALID_PROGRAM_EXECUTABLE                = -45;
    INVALID_KERNEL_NAME                       = -46;
    INVALID_KERNEL_DEFINITION                 = -47;
    INVALID_KERNEL                            = -48;
    INVALID_ARG_INDEX                         = -49;
    INVALID_ARG_VALUE                         = -50;
    INVALID_ARG_SIZE                          = -51;
    INVALID_KERNEL_ARGS                       = -52;
    INVALID_WORK_DIMENSION                    = -53;
    INVALID_WORK_GROUP_SIZE                   = -54;
    INVALID_WORK_ITEM_SIZE                    = -55;
    INVALID_GLOBAL_OFFSET                     = -56;
    INVALID_EVENT_WAIT_LIST                   = -57;
    INVALID_EVENT                             = -58;
    INVALID_OPERATION                         = -59;
    INVALID_BUFFER_SIZE                       = -61;
    INVALID_GLOBAL_WORK_SIZE                  = -63;
    INVALID_PROPERTY                          = -64;
    INVALID_IMAGE_DESCRIPTOR                  = -65;
}

impl ErrorCode {
    #[inline]
    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    /// 把原生调用的状态码转换成 [`Result`]。
    #[inline]
    pub const fn check(self) -> Result<(), Self> {
        if self.0 == 0 {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}({})", self.0),
            None => write!(f, "UNKNOWN({})", self.0),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ErrorKind {
    /// 带状态码的失败，来自原生运行时或宿主层的同义检查。
    Status(ErrorCode),
    /// 违反宿主层不变量，在调用原生运行时之前就被拒绝。
    Precondition,
    /// 没有任何平台提供满足条件的设备。
    NoDeviceFound,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Status(code) => write!(f, "{code}"),
            Self::Precondition => write!(f, "precondition violated"),
            Self::NoDeviceFound => write!(f, "no device found"),
        }
    }
}

#[derive(thiserror::Error, Clone, Debug)]
#[error("{kind}: {info}")]
pub struct Error {
    pub kind: ErrorKind,
    pub info: String,
}

impl Error {
    /// 错误携带的状态码，宿主层前置条件错误没有状态码。
    #[inline]
    pub fn code(&self) -> Option<ErrorCode> {
        match self.kind {
            ErrorKind::Status(code) => Some(code),
            _ => None,
        }
    }

    #[inline]
    pub fn is_precondition(&self) -> bool {
        self.kind == ErrorKind::Precondition
    }
}

pub(crate) mod functions {
    use super::{Error, ErrorCode, ErrorKind::*};

    macro_rules! builder {
        ($name:ident $kind:expr) => {
            #[inline]
            pub fn $name(info: impl Into<String>) -> Error {
                Error {
                    kind: $kind,
                    info: info.into(),
                }
            }
        };
    }

    builder!(precondition    Precondition );
    builder!(no_device_found NoDeviceFound);

    #[inline]
    pub fn status(code: ErrorCode, info: impl Into<String>) -> Error {
        Error {
            kind: Status(code),
            info: info.into(),
        }
    }
}

/// 对象最近一次操作的状态码。
#[derive(Debug)]
#[repr(transparent)]
pub(crate) struct LastError(AtomicI32);

impl Default for LastError {
    #[inline]
    fn default() -> Self {
        Self(AtomicI32::new(0))
    }
}

impl LastError {
    #[inline]
    pub fn get(&self) -> ErrorCode {
        ErrorCode(self.0.load(Acquire))
    }

    #[inline]
    pub fn set(&self, code: ErrorCode) {
        self.0.store(code.0, Release)
    }

    /// 记录原生调用的结果，失败时附上出错的操作名。
    pub fn record<T>(&self, what: &str, result: Result<T, ErrorCode>) -> Result<T, Error> {
        match result {
            Ok(val) => {
                self.set(ErrorCode::SUCCESS);
                Ok(val)
            }
            Err(code) => {
                self.set(code);
                Err(functions::status(code, what))
            }
        }
    }

    /// 记录宿主层产生的错误。
    pub fn fail<T>(&self, e: Error) -> Result<T, Error> {
        if let Some(code) = e.code() {
            self.set(code)
        }
        Err(e)
    }
}

#[test]
fn test_names() {
    assert_eq!(ErrorCode::INVALID_KERNEL_ARGS.name(), Some("INVALID_KERNEL_ARGS"));
    assert_eq!(ErrorCode(-1000).name(), None);
    assert_eq!(ErrorCode::SUCCESS.check(), Ok(()));
    assert_eq!(
        ErrorCode::INVALID_VALUE.to_string(),
        "INVALID_VALUE(-30)".to_string()
    );
}

#[test]
fn test_last_error() {
    let last = LastError::default();
    assert!(last.get().is_success());
    let e = last
        .record::<()>("create", Err(ErrorCode::OUT_OF_RESOURCES))
        .unwrap_err();
    assert_eq!(e.code(), Some(ErrorCode::OUT_OF_RESOURCES));
    assert_eq!(last.get(), ErrorCode::OUT_OF_RESOURCES);
    last.record("create", Ok(())).unwrap();
    assert_eq!(last.get(), ErrorCode::SUCCESS);

    let e = last.fail::<()>(functions::precondition("twice")).unwrap_err();
    assert!(e.is_precondition());
    assert_eq!(last.get(), ErrorCode::SUCCESS);
}
