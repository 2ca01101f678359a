//! Application settings management
//!
//! Persists the login, chosen network and quality, volume and the last
//! played channel between runs.

use std::fs;
use std::io;
use std::path::{ Path, PathBuf };

use serde::{ Deserialize, Serialize };
use thiserror::Error;


/// Errors reading or writing the settings file.
#[derive( Debug, Error )]
pub enum SettingsError {
    #[error( "No configuration directory available" )]
    NoConfigDir,

    #[error( "Settings I/O failed: {0}" )]
    Io( #[from] io::Error ),

    #[error( "Invalid settings file: {0}" )]
    Json( #[from] serde_json::Error ),
}


/// Application settings.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct Settings {
    /// Network key, e.g. `di`.
    pub network: String,

    /// API key from the last successful login.
    pub api_key: Option<String>,

    /// Preferred streamlist key.
    pub streamlist_key: Option<String>,

    /// Volume percentage.
    pub volume: i32,

    /// Key of the channel played last.
    pub last_played_channel: Option<String>,
}


impl Default for Settings {
    fn default() -> Self {
        Self {
            network: "di".to_string(),
            api_key: None,
            streamlist_key: None,
            volume: 50,
            last_played_channel: None,
        }
    }
}


impl Settings {
    /// Returns the path to the settings file.
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "tune" ).join( "settings.json" ) )
    }


    /// Loads settings from disk, or returns defaults if missing or unreadable.
    pub fn load() -> Self {
        let Some( path ) = Self::path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        Self::load_from( &path ).unwrap_or_else( |e| {
            tracing::warn!( "Failed to load settings from {}: {}", path.display(), e );
            Self::default()
        })
    }


    /// Loads settings from a specific file.
    pub fn load_from( path: &Path ) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string( path )?;
        Ok( serde_json::from_str( &contents )? )
    }


    /// Saves settings to disk, logging failures.
    pub fn save( &self ) {
        let result = Self::path()
            .ok_or( SettingsError::NoConfigDir )
            .and_then( |path| self.save_to( &path ) );

        if let Err( e ) = result {
            tracing::warn!( "Failed to save settings: {}", e );
        }
    }


    /// Saves settings to a specific file, creating parent directories.
    pub fn save_to( &self, path: &Path ) -> Result<(), SettingsError> {
        if let Some( parent ) = path.parent() {
            fs::create_dir_all( parent )?;
        }

        fs::write( path, serde_json::to_string_pretty( self )? )?;
        tracing::debug!( "Saved settings to {}", path.display() );
        Ok(())
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "nested" ).join( "settings.json" );

        let settings = Settings {
            network: "radiotunes".into(),
            api_key: Some( "k3y".into() ),
            streamlist_key: Some( "premium".into() ),
            volume: 35,
            last_played_channel: Some( "jazzclassics".into() ),
        };
        settings.save_to( &path ).unwrap();

        assert_eq!( Settings::load_from( &path ).unwrap(), settings );
    }


    #[test]
    fn test_missing_fields_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, r#"{ "api_key": "abc" }"# ).unwrap();

        let settings = Settings::load_from( &path ).unwrap();
        assert_eq!( settings.api_key.as_deref(), Some( "abc" ) );
        assert_eq!( settings.network, "di" );
        assert_eq!( settings.volume, 50 );
    }


    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, "not json" ).unwrap();

        assert!( matches!( Settings::load_from( &path ), Err( SettingsError::Json( _ ) ) ) );
    }
}
