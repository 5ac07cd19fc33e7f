use crate::binary::ResolvedBinaryOptions;
use crate::error::{Error, Result};
use crate::server::InstanceOptions;

/// Validates the effective binary options before any I/O happens.
pub fn validate_binary_options(options: &ResolvedBinaryOptions) -> Result<()> {
    let version = options.version.as_str();
    if version.trim().is_empty() {
        return Err(Error::ConfigInvalid("Binary version is empty".to_string()));
    }

    // The version names a directory inside the download dir.
    if version.contains('/') || version.contains('\\') || version == "." || version == ".." {
        return Err(Error::ConfigInvalid(format!(
            "Binary version '{}' must not contain path separators",
            version
        )));
    }

    if options.download_dir.is_file() {
        return Err(Error::ConfigInvalid(format!(
            "Download directory {} is a file",
            options.download_dir.display()
        )));
    }

    Ok(())
}

/// Validates instance options
pub fn validate_instance_options(options: &InstanceOptions) -> Result<()> {
    if let Some(ip) = &options.ip {
        if ip.trim().is_empty() {
            return Err(Error::ConfigInvalid("Bind address is empty".to_string()));
        }
        if ip.chars().any(char::is_whitespace) {
            return Err(Error::ConfigInvalid(format!(
                "Bind address '{}' contains whitespace",
                ip
            )));
        }
    }

    Ok(())
}
