use std::{
    fs,
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

use log::info;

use super::TextTool;
use crate::error::{ChainError, ChainResult};

const ESCAPE: &str = "安全錯誤：不允許存取上層目錄或絕對路徑";

/// Directory that file tools may not leave.
#[derive(Clone, Debug)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a relative name into the sandbox.
    ///
    /// Only plain path components are accepted, and an existing target must still resolve
    /// inside the root once symlinks are followed.
    pub fn resolve(&self, name: &str) -> ChainResult<PathBuf> {
        let relative = Path::new(name);
        if name.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(ChainError::Security(ESCAPE.into()));
        }

        let path = self.root.join(relative);
        if path.exists() {
            let root = self
                .root
                .canonicalize()
                .map_err(|_| ChainError::Security(ESCAPE.into()))?;
            let target = path
                .canonicalize()
                .map_err(|_| ChainError::Security(ESCAPE.into()))?;
            if !target.starts_with(&root) {
                return Err(ChainError::Security(ESCAPE.into()));
            }
        }

        Ok(path)
    }
}

pub struct ReadFile(pub Sandbox);

impl TextTool for ReadFile {
    const NAME: &'static str = "read_file";
    const DESCRIPTION: &'static str = "讀取檔案內容。輸入應該是檔案名稱，例如：test.txt";

    fn invoke(&self, input: &str) -> ChainResult<String> {
        let name = input.trim();
        let path = self.0.resolve(name)?;

        match fs::read_to_string(&path) {
            Ok(content) => Ok(format!("檔案「{name}」的內容：\n{content}")),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(format!("找不到檔案「{name}」")),
            Err(err) => Ok(format!("讀取檔案時發生錯誤：{err}")),
        }
    }
}

pub struct WriteFile(pub Sandbox);

impl TextTool for WriteFile {
    const NAME: &'static str = "write_file";
    const DESCRIPTION: &'static str = "寫入檔案。輸入格式：檔案名稱|內容，例如：test.txt|Hello World";

    fn invoke(&self, input: &str) -> ChainResult<String> {
        let Some((name, content)) = input.split_once('|') else {
            return Err(ChainError::Parse("格式錯誤。請使用格式：檔案名稱|內容".into()));
        };
        let name = name.trim();
        let path = self.0.resolve(name)?;

        let written = path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|_| fs::write(&path, content.trim()));

        match written {
            Ok(()) => {
                info!("Wrote {}", path.display());
                Ok(format!("✅ 成功寫入檔案「{name}」"))
            }
            Err(err) => Ok(format!("寫入檔案時發生錯誤：{err}")),
        }
    }
}
