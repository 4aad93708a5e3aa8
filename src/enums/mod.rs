mod version;

pub use self::version::Version;
