use crate::error::AppError;
use photo_upload::PhotoFile;
use std::fs;
use std::path::{Path, PathBuf};

#[cfg(target_os = "android")]
fn android_files_dir() -> Option<PathBuf> {
    use jni::{
        objects::{JObject, JString},
        JavaVM,
    };
    unsafe {
        let ctx = ndk_context::android_context();
        let vm = JavaVM::from_raw(ctx.vm().cast()).ok()?;
        let mut env = vm.attach_current_thread().ok()?;
        let activity = JObject::from_raw(ctx.context().cast());
        let files_dir = env
            .call_method(activity, "getFilesDir", "()Ljava/io/File;", &[])
            .ok()?
            .l()
            .ok()?;
        let abs_path_obj = env
            .call_method(files_dir, "getAbsolutePath", "()Ljava/lang/String;", &[])
            .ok()?
            .l()
            .ok()?;
        let abs_path_jstring: JString = JString::from(abs_path_obj);
        let abs_path: String = env.get_string(&abs_path_jstring).ok()?.into();
        Some(PathBuf::from(abs_path))
    }
}

/// Get the app data directory for the current platform
pub fn get_app_data_dir() -> PathBuf {
    #[cfg(target_os = "android")]
    {
        if let Some(dir) = android_files_dir() {
            return dir;
        }
        for d in [
            "/data/user/0/fr.optitour.booth/files",
            "/data/data/fr.optitour.booth/files",
        ] {
            let p = PathBuf::from(d);
            if p.exists() {
                return p;
            }
        }
        PathBuf::from("./data")
    }

    #[cfg(not(target_os = "android"))]
    {
        PathBuf::from("./data")
    }
}

/// Reads a picked photo from disk
pub fn read_photo_file(path: &Path) -> Result<PhotoFile, AppError> {
    let data = fs::read(path)?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| AppError::Validation(format!("Invalid photo path: {}", path.display())))?;
    Ok(PhotoFile::from_bytes(name, data))
}
