//! 图片数据集目录的管理

use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Result, bail};
use log::{info, warn};
use regex::Regex;
use tokio::fs::File;
use tokio_tar::ArchiveBuilder;
use walkdir::{DirEntry, WalkDir};
use zip::ZipArchive;

use crate::config::{ALLOWED_IMAGE_EXTS, DataDir};

/// 允许的图片后缀，不区分大小写
static RE_IMAGE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("(?i)^({})$", ALLOWED_IMAGE_EXTS.join("|")))
        .expect("failed to build regex")
});

/// 判断文件名是否为允许的图片格式
pub fn allowed_image(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .is_some_and(|ext| RE_IMAGE_SUFFIX.is_match(&ext.to_string_lossy()))
}

/// 判断文件名是否为 zip 压缩包
pub fn is_zip_name(filename: &str) -> bool {
    filename.to_lowercase().ends_with(".zip")
}

/// 隐藏文件、查询图片目录和 macOS 压缩包里的资源文件夹
fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.') || name == "__MACOSX")
}

/// 递归查找目录中的所有图片，按路径排序
///
/// 隐藏目录（包括查询图片目录）不会被遍历。返回的路径会写入索引的路径列表文件，
/// 因此无法用 UTF-8 表示或包含换行符的路径会被跳过。
pub fn find_image_files(dir: impl AsRef<Path>) -> Vec<String> {
    let mut files = WalkDir::new(dir)
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let path = entry.path();
            if !allowed_image(&entry.file_name().to_string_lossy()) {
                return None;
            }
            match path.to_str() {
                Some(s) if !s.contains('\n') => Some(s.to_string()),
                _ => {
                    warn!("跳过无法记录的路径: {}", path.display());
                    None
                }
            }
        })
        .collect::<Vec<_>>();
    files.sort();
    files
}

/// 解压内存中的 zip 压缩包到指定目录，返回解压出的文件数量
///
/// 只写出普通文件和目录，符号链接会被跳过。
/// 路径会逃逸出目标目录的条目会导致解压失败。
pub fn extract_zip(data: &[u8], dir: impl AsRef<Path>) -> Result<usize> {
    let dir = dir.as_ref();
    let mut archive = ZipArchive::new(Cursor::new(data))?;
    let mut count = 0;
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let Some(name) = file.enclosed_name() else {
            bail!("zip entry escapes the target directory: {}", file.name());
        };
        if file.is_symlink() {
            warn!("跳过符号链接: {}", name.display());
            continue;
        }

        let target = dir.join(name);
        if file.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&target)?;
        io::copy(&mut file, &mut out)?;
        count += 1;
    }
    info!("解压完成，共 {} 个文件", count);
    Ok(count)
}

/// 解压 tar 归档到指定目录，不允许指向目录之外的符号链接
pub async fn extract_tar(path: impl AsRef<Path>, dir: impl AsRef<Path>) -> Result<()> {
    let file = File::open(path.as_ref()).await?;
    let mut archive = ArchiveBuilder::new(file).set_allow_external_symlinks(false).build();
    archive.unpack(dir.as_ref()).await?;
    Ok(())
}

/// 将目录中的图片复制到图片目录，保持相对路径，返回复制的图片数量
pub fn copy_images(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<usize> {
    let src = src.as_ref();
    let mut count = 0;
    for file in find_image_files(src) {
        let file = PathBuf::from(file);
        let target = dst.as_ref().join(file.strip_prefix(src)?);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&file, &target)?;
        count += 1;
    }
    Ok(count)
}

/// 删除图片目录与索引文件，然后重新创建空的图片目录
pub fn clear_dataset_and_index(data_dir: &DataDir) -> Result<()> {
    let images = data_dir.images();
    if images.exists() {
        fs::remove_dir_all(&images)?;
    }
    fs::create_dir_all(&images)?;

    for path in [data_dir.index(), data_dir.index_paths()] {
        if path.exists() {
            fs::remove_file(path)?;
        }
    }
    Ok(())
}

/// 删除查询图片目录中之前保存的查询图片
pub fn remove_query_images(query_dir: impl AsRef<Path>) {
    let Ok(entries) = fs::read_dir(query_dir.as_ref()) else {
        return;
    };
    for entry in entries.filter_map(|entry| entry.ok()) {
        if let Err(e) = fs::remove_file(entry.path()) {
            warn!("删除查询图片失败 {}: {}", entry.path().display(), e);
        }
    }
}

/// 将图片的本地路径转换为静态文件服务的 URL
///
/// 例：`uploaded_images/cats/1.jpg` -> `/images/cats/1.jpg`。
/// 不在图片目录下的路径只保留文件名。
pub fn rewrite_path(path: impl AsRef<Path>, images_dir: impl AsRef<Path>) -> String {
    let path = path.as_ref();
    let images_dir = images_dir.as_ref();

    let rel = path.strip_prefix(images_dir).map(Path::to_path_buf).ok().or_else(|| {
        let path = path.canonicalize().ok()?;
        let dir = images_dir.canonicalize().ok()?;
        path.strip_prefix(dir).map(Path::to_path_buf).ok()
    });

    match rel {
        Some(rel) => {
            let parts =
                rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>();
            format!("/images/{}", parts.join("/"))
        }
        None => {
            let name = path.file_name().map(|s| s.to_string_lossy()).unwrap_or_default();
            format!("/images/{}", name)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::tempdir;
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    use super::*;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_allowed_image() {
        assert!(allowed_image("cat.jpg"));
        assert!(allowed_image("cat.JPEG"));
        assert!(allowed_image("dir/cat.png"));
        assert!(!allowed_image("cat.gif"));
        assert!(!allowed_image("cat"));
        assert!(!allowed_image("jpg"));
    }

    #[test]
    fn test_is_zip_name() {
        assert!(is_zip_name("dataset.zip"));
        assert!(is_zip_name("DATASET.ZIP"));
        assert!(!is_zip_name("dataset.tar"));
        assert!(!is_zip_name("zip"));
    }

    #[test]
    fn test_find_image_files() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        touch(&root.join("b/2.png"));
        touch(&root.join("a/1.JPG"));
        touch(&root.join("a/notes.txt"));
        touch(&root.join("c.jpeg"));
        touch(&root.join("query_abc.jpg"));
        touch(&root.join(".query/query_def.jpg"));
        touch(&root.join(".hidden.jpg"));
        touch(&root.join("__MACOSX/a/._1.JPG"));

        let files = find_image_files(root);
        let rel = files
            .iter()
            .map(|f| Path::new(f).strip_prefix(root).unwrap().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(rel, vec!["a/1.JPG", "b/2.png", "c.jpeg", "query_abc.jpg"]);
    }

    #[test]
    fn test_find_image_files_missing_dir() {
        let temp_dir = tempdir().unwrap();
        assert!(find_image_files(temp_dir.path().join("missing")).is_empty());
    }

    #[test]
    fn test_extract_zip() {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        zip.start_file("photos/1.jpg", options).unwrap();
        zip.write_all(b"one").unwrap();
        zip.start_file("2.png", options).unwrap();
        zip.write_all(b"two").unwrap();
        let data = zip.finish().unwrap().into_inner();

        let temp_dir = tempdir().unwrap();
        assert_eq!(extract_zip(&data, temp_dir.path()).unwrap(), 2);
        assert_eq!(fs::read(temp_dir.path().join("photos/1.jpg")).unwrap(), b"one");
        assert_eq!(find_image_files(temp_dir.path()).len(), 2);
    }

    #[test]
    fn test_extract_zip_skips_symlinks() {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        zip.start_file("a.png", options).unwrap();
        zip.write_all(b"a").unwrap();
        zip.add_symlink("etc", "/etc", options).unwrap();
        zip.add_symlink("photos/link.png", "../a.png", options).unwrap();
        let data = zip.finish().unwrap().into_inner();

        let temp_dir = tempdir().unwrap();
        assert_eq!(extract_zip(&data, temp_dir.path()).unwrap(), 1);
        assert!(temp_dir.path().join("a.png").is_file());
        assert!(fs::symlink_metadata(temp_dir.path().join("etc")).is_err());
        assert!(fs::symlink_metadata(temp_dir.path().join("photos/link.png")).is_err());
    }

    #[test]
    fn test_extract_zip_rejects_escaping_entries() {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file("../evil.png", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"x").unwrap();
        let data = zip.finish().unwrap().into_inner();

        let temp_dir = tempdir().unwrap();
        let target = temp_dir.path().join("images");
        assert!(extract_zip(&data, &target).is_err());
        assert!(!temp_dir.path().join("evil.png").exists());
    }

    #[test]
    fn test_extract_invalid_zip() {
        let temp_dir = tempdir().unwrap();
        assert!(extract_zip(b"not a zip", temp_dir.path()).is_err());
    }

    #[test]
    fn test_copy_images() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        touch(&src.path().join("x/1.jpg"));
        touch(&src.path().join("x/readme.md"));

        assert_eq!(copy_images(src.path(), dst.path()).unwrap(), 1);
        assert!(dst.path().join("x/1.jpg").exists());
        assert!(!dst.path().join("x/readme.md").exists());
    }

    #[test]
    fn test_clear_dataset_and_index() {
        let temp_dir = tempdir().unwrap();
        let data_dir = DataDir::new(temp_dir.path());
        touch(&data_dir.images().join("old/1.jpg"));
        touch(&data_dir.index());
        touch(&data_dir.index_paths());

        clear_dataset_and_index(&data_dir).unwrap();

        assert!(data_dir.images().is_dir());
        assert_eq!(fs::read_dir(data_dir.images()).unwrap().count(), 0);
        assert!(!data_dir.index().exists());
        assert!(!data_dir.index_paths().exists());
    }

    #[test]
    fn test_remove_query_images() {
        let temp_dir = tempdir().unwrap();
        let data_dir = DataDir::new(temp_dir.path());
        touch(&data_dir.queries().join("query_1.jpg"));
        touch(&data_dir.queries().join("query_2.png"));
        touch(&data_dir.images().join("query_user.jpg"));

        remove_query_images(data_dir.queries());

        assert_eq!(fs::read_dir(data_dir.queries()).unwrap().count(), 0);
        assert!(data_dir.images().join("query_user.jpg").exists());
    }

    #[test]
    fn test_rewrite_path() {
        assert_eq!(
            rewrite_path("uploaded_images/cats/1.jpg", "uploaded_images"),
            "/images/cats/1.jpg"
        );
        assert_eq!(rewrite_path("/data/imgs/a.png", "/data/imgs"), "/images/a.png");
        assert_eq!(rewrite_path("/elsewhere/dogs/2.jpg", "/data/imgs"), "/images/2.jpg");
    }
}
