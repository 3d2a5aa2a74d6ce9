//! PGM Image I/O
//!
//! 网格以二进制 PGM (P5, maxval 255) 存储，每个字节一个细胞，行优先。
//!
//! ```text
//! P5
//! <width> <height>
//! 255
//! <width * height bytes>
//! ```
//!
//! 输入文件名 `<W>x<H>.pgm`，输出文件名 `<W>x<H>x<turn>.pgm`。

use std::path::{Path, PathBuf};

use thiserror::Error;

use gol_protocol::{Grid, GridError};

#[derive(Error, Debug)]
pub enum PgmError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed PGM header: {0}")]
    Header(String),

    #[error("Invalid image: {0}")]
    Grid(#[from] GridError),
}

/// `<dir>/<W>x<H>.pgm`
pub fn input_path(dir: &Path, width: usize, height: usize) -> PathBuf {
    dir.join(format!("{}x{}.pgm", width, height))
}

/// `<dir>/<W>x<H>x<turn>.pgm`
pub fn output_path(dir: &Path, width: usize, height: usize, turn: u64) -> PathBuf {
    dir.join(format!("{}x{}x{}.pgm", width, height, turn))
}

pub fn read(path: &Path) -> Result<Grid, PgmError> {
    let bytes = std::fs::read(path).map_err(|source| PgmError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    decode(&bytes)
}

pub fn write(path: &Path, grid: &Grid) -> Result<(), PgmError> {
    let io_err = |source| PgmError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(path, encode(grid)).map_err(io_err)
}

pub fn encode(grid: &Grid) -> Vec<u8> {
    let mut out = format!("P5\n{} {}\n255\n", grid.width(), grid.height()).into_bytes();
    out.extend_from_slice(grid.cells());
    out
}

pub fn decode(bytes: &[u8]) -> Result<Grid, PgmError> {
    let mut pos = 0;

    let magic = next_token(bytes, &mut pos)?;
    if magic != b"P5" {
        return Err(PgmError::Header(format!(
            "expected magic P5, found {:?}",
            String::from_utf8_lossy(magic)
        )));
    }
    let width = next_number(bytes, &mut pos, "width")?;
    let height = next_number(bytes, &mut pos, "height")?;
    let maxval = next_number(bytes, &mut pos, "maxval")?;
    if maxval != 255 {
        return Err(PgmError::Header(format!("unsupported maxval {}", maxval)));
    }

    // 恰好一个空白字符分隔头部与像素数据
    pos += 1;
    let pixels = bytes.get(pos..).unwrap_or_default();
    let expected = width * height;
    if pixels.len() < expected {
        return Err(PgmError::Header(format!(
            "expected {} pixel bytes, found {}",
            expected,
            pixels.len()
        )));
    }

    Ok(Grid::from_cells(width, height, pixels[..expected].to_vec())?)
}

/// 跳过空白与 `#` 注释，返回下一个头部字段
fn next_token<'a>(bytes: &'a [u8], pos: &mut usize) -> Result<&'a [u8], PgmError> {
    loop {
        match bytes.get(*pos) {
            Some(b) if b.is_ascii_whitespace() => *pos += 1,
            Some(b'#') => {
                while bytes.get(*pos).is_some_and(|&b| b != b'\n') {
                    *pos += 1;
                }
            }
            Some(_) => break,
            None => return Err(PgmError::Header("unexpected end of header".to_string())),
        }
    }

    let start = *pos;
    while bytes.get(*pos).is_some_and(|b| !b.is_ascii_whitespace()) {
        *pos += 1;
    }
    Ok(&bytes[start..*pos])
}

fn next_number(bytes: &[u8], pos: &mut usize, field: &str) -> Result<usize, PgmError> {
    let token = next_token(bytes, pos)?;
    std::str::from_utf8(token)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| PgmError::Header(format!("invalid {}", field)))
}
