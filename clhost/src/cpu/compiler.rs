//! 核函数签名扫描。
//!
//! 模拟设备不生成代码，编译只从源码中找出核函数的签名，再与宿主注册的实现配对。

use std::{fmt, mem::size_of};

/// 核函数参数的种类，决定绑定时的检查规则。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(super) enum ParamKind {
    Global,
    Constant,
    Local,
    Image,
    Sampler,
    /// 按值传递，携带字节数。
    Value(usize),
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub(super) struct Param {
    pub name: String,
    pub kind: ParamKind,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub(super) struct Signature {
    pub name: String,
    pub params: Vec<Param>,
    /// 声明所在的行。
    pub line: usize,
}

/// 编译诊断，格式与常见编译器的日志相同。
#[derive(Clone, PartialEq, Eq, Debug)]
pub(super) struct Diagnostic {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<source>:{}: error: {}", self.line, self.message)
    }
}

/// 检查编译选项，返回不认识的选项。
pub(super) fn check_options(options: &str) -> Result<(), String> {
    let mut words = options.split_whitespace();
    while let Some(word) = words.next() {
        match word {
            "-D" | "-I" => {
                if words.next().is_none() {
                    return Err(word.into());
                }
            }
            "-w" | "-Werror" => {}
            _ if word.starts_with("-D") || word.starts_with("-I") || word.starts_with("-cl-") => {}
            _ => return Err(word.into()),
        }
    }
    Ok(())
}

/// 扫描源码中所有核函数的签名。
pub(super) fn scan(source: &str) -> Result<Vec<Signature>, Vec<Diagnostic>> {
    let tokens = tokenize(source);
    let mut ans = Vec::<Signature>::new();
    let mut errors = vec![];

    let mut i = 0;
    while i < tokens.len() {
        if !matches!(tokens[i].text, "__kernel" | "kernel") {
            i += 1;
            continue;
        }
        let line = tokens[i].line;
        i += 1;
        // 跳过属性
        while i < tokens.len() && tokens[i].text == "__attribute__" {
            i = skip_group(&tokens, i + 1);
        }
        match tokens.get(i).map(|t| t.text) {
            Some("void") => i += 1,
            _ => {
                errors.push(Diagnostic {
                    line,
                    message: "kernel must return void".into(),
                });
                continue;
            }
        }
        let Some(name) = tokens.get(i).filter(|t| is_ident(t.text)) else {
            errors.push(Diagnostic {
                line,
                message: "expected kernel name".into(),
            });
            continue;
        };
        let name = name.text.to_string();
        i += 1;
        if tokens.get(i).map(|t| t.text) != Some("(") {
            errors.push(Diagnostic {
                line,
                message: format!("expected `(` after kernel `{name}`"),
            });
            continue;
        }
        let end = skip_group(&tokens, i);
        if end > tokens.len() {
            errors.push(Diagnostic {
                line,
                message: format!("unterminated parameter list of kernel `{name}`"),
            });
            break;
        }
        let inner = &tokens[i + 1..end - 1];
        i = end;

        if ans.iter().any(|s| s.name == name) {
            errors.push(Diagnostic {
                line,
                message: format!("redefinition of kernel `{name}`"),
            });
            continue;
        }
        let mut params = vec![];
        if !(inner.is_empty() || matches!(inner, [t] if t.text == "void")) {
            for group in inner.split(|t| t.text == ",") {
                match param(group) {
                    Ok(p) => params.push(p),
                    Err(message) => errors.push(Diagnostic {
                        line: group.first().map_or(line, |t| t.line),
                        message: format!("kernel `{name}`: {message}"),
                    }),
                }
            }
        }
        ans.push(Signature { name, params, line })
    }

    if errors.is_empty() {
        Ok(ans)
    } else {
        Err(errors)
    }
}

fn param(tokens: &[Token]) -> Result<Param, String> {
    let mut space = None;
    let mut pointer = false;
    let mut ty = vec![];
    for t in tokens {
        match t.text {
            "__global" | "global" => space = Some(ParamKind::Global),
            "__constant" | "constant" => space = Some(ParamKind::Constant),
            "__local" | "local" => space = Some(ParamKind::Local),
            "__private" | "private" => space = Some(ParamKind::Value(0)),
            "const" | "volatile" | "restrict" | "__restrict" | "__read_only" | "read_only"
            | "__write_only" | "write_only" | "__read_write" | "read_write" => {}
            "*" => pointer = true,
            text if is_ident(text) => ty.push(text),
            text => return Err(format!("unexpected `{text}` in parameter")),
        }
    }
    let Some(name) = ty.pop() else {
        return Err("empty parameter".into());
    };
    let name = name.to_string();
    if ty.is_empty() {
        return Err(format!("parameter `{name}` has no type"));
    }
    let ty = ty.join(" ");

    let kind = if pointer {
        match space {
            Some(kind @ (ParamKind::Global | ParamKind::Constant | ParamKind::Local)) => kind,
            _ => return Err(format!("pointer parameter `{name}` must be global, constant or local")),
        }
    } else if ty.starts_with("image") && ty.ends_with("_t") {
        ParamKind::Image
    } else if ty == "sampler_t" {
        ParamKind::Sampler
    } else if matches!(space, Some(ParamKind::Global | ParamKind::Constant | ParamKind::Local)) {
        return Err(format!("parameter `{name}` in an address space must be a pointer"));
    } else {
        match value_size(&ty) {
            Some(size) => ParamKind::Value(size),
            None => return Err(format!("parameter `{name}` has unsupported type `{ty}`")),
        }
    };
    Ok(Param { name, kind })
}

/// 标量和向量类型的字节数，3 分量向量按 4 分量对齐。
fn value_size(ty: &str) -> Option<usize> {
    let ty = match ty {
        "unsigned" | "signed" => "int",
        _ => ty
            .strip_prefix("unsigned ")
            .or_else(|| ty.strip_prefix("signed "))
            .unwrap_or(ty),
    };
    let scalar = |name: &str| -> Option<usize> {
        Some(match name {
            "bool" | "char" | "uchar" => 1,
            "short" | "ushort" | "half" => 2,
            "int" | "uint" | "float" => 4,
            "long" | "ulong" | "double" => 8,
            "size_t" | "ptrdiff_t" | "intptr_t" | "uintptr_t" => size_of::<usize>(),
            _ => return None,
        })
    };
    if let Some(size) = scalar(ty) {
        return Some(size);
    }
    let base = ty.trim_end_matches(|c: char| c.is_ascii_digit());
    let n = match &ty[base.len()..] {
        "2" => 2,
        "3" | "4" => 4,
        "8" => 8,
        "16" => 16,
        _ => return None,
    };
    match base {
        "bool" | "size_t" | "ptrdiff_t" | "intptr_t" | "uintptr_t" => None,
        _ => scalar(base).map(|size| size * n),
    }
}

#[derive(Clone, Copy, Debug)]
struct Token<'a> {
    text: &'a str,
    line: usize,
}

fn is_ident(text: &str) -> bool {
    text.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
}

/// 从开括号处跳过一个括号组，返回组后的位置。
fn skip_group(tokens: &[Token], start: usize) -> usize {
    let mut depth = 0usize;
    for (i, t) in tokens.iter().enumerate().skip(start) {
        match t.text {
            "(" => depth += 1,
            ")" => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i + 1;
                }
            }
            _ if depth == 0 => return i,
            _ => {}
        }
    }
    tokens.len() + 1
}

/// 切分成标识符、数字和单字符符号，丢弃注释、字符串和预处理行。
fn tokenize(source: &str) -> Vec<Token> {
    let bytes = source.as_bytes();
    let mut ans = vec![];
    let mut line = 1;
    let mut line_start = true;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b'\n' => {
                line += 1;
                line_start = true;
                i += 1;
                continue;
            }
            b'#' if line_start => {
                // 预处理行，考虑续行
                while i < bytes.len() && !(bytes[i] == b'\n' && bytes[i - 1] != b'\\') {
                    if bytes[i] == b'\n' {
                        line += 1
                    }
                    i += 1
                }
                continue;
            }
            _ if c.is_ascii_whitespace() => {
                i += 1;
                continue;
            }
            _ => {}
        }
        line_start = false;
        if bytes[i..].starts_with(b"//") {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1
            }
        } else if bytes[i..].starts_with(b"/*") {
            i += 2;
            while i < bytes.len() && !bytes[i..].starts_with(b"*/") {
                if bytes[i] == b'\n' {
                    line += 1
                }
                i += 1
            }
            i += 2;
        } else if c == b'"' || c == b'\'' {
            i += 1;
            while i < bytes.len() && bytes[i] != c {
                if bytes[i] == b'\\' {
                    i += 1
                }
                i += 1
            }
            i += 1;
        } else if c.is_ascii_alphanumeric() || c == b'_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1
            }
            ans.push(Token {
                text: &source[start..i],
                line,
            })
        } else {
            let len = source[i..].chars().next().map_or(1, char::len_utf8);
            ans.push(Token {
                text: &source[i..i + len],
                line,
            });
            i += len
        }
    }
    ans
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_scan() {
        let source = r#"
#define N 4
// __kernel void commented(int x)
/* kernel void also_commented() */
__kernel void add(__global const float* restrict a, global float *b, uint n, float4 v) {
    b[0] = a[0];
}
kernel __attribute__((reqd_work_group_size(16, 1, 1)))
void blur(read_only image2d_t src, sampler_t s, __local float* tmp, unsigned int k) {}
void helper(int x) {}
"#;
        let kernels = scan(source).unwrap();
        assert_eq!(kernels.len(), 2);
        assert_eq!(kernels[0].name, "add");
        let kinds = kernels[0].params.iter().map(|p| p.kind).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            [
                ParamKind::Global,
                ParamKind::Global,
                ParamKind::Value(4),
                ParamKind::Value(16)
            ]
        );
        assert_eq!(kernels[0].params[1].name, "b");

        assert_eq!(kernels[1].name, "blur");
        let kinds = kernels[1].params.iter().map(|p| p.kind).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            [
                ParamKind::Image,
                ParamKind::Sampler,
                ParamKind::Local,
                ParamKind::Value(4)
            ]
        );
    }

    #[test]
    fn test_errors() {
        let errors = scan("__kernel void f(int* p, mystery m) {}\n__kernel int g() {}").unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].message.contains("`p`"));
        assert!(errors[1].message.contains("mystery"));
        assert_eq!(errors[2].line, 2);
        assert_eq!(
            errors[2].to_string(),
            "<source>:2: error: kernel must return void"
        );

        assert!(scan("kernel void f(void) {} kernel void f() {}").is_err());
        assert!(scan("kernel void f(void) {}").unwrap()[0].params.is_empty());
    }

    #[test]
    fn test_value_size() {
        assert_eq!(value_size("uchar"), Some(1));
        assert_eq!(value_size("unsigned int"), Some(4));
        assert_eq!(value_size("double2"), Some(16));
        assert_eq!(value_size("float3"), Some(16));
        assert_eq!(value_size("size_t"), Some(size_of::<usize>()));
        assert_eq!(value_size("float5"), None);
        assert_eq!(value_size("struct"), None);
    }

    #[test]
    fn test_options() {
        assert!(check_options("").is_ok());
        assert!(check_options("-D N=4 -DFOO -cl-fast-relaxed-math -w").is_ok());
        assert_eq!(check_options("-O9"), Err("-O9".into()));
        assert_eq!(check_options("-D"), Err("-D".into()));
    }
}
