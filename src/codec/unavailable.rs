//! Stand-in adapter for codecs whose backend was not compiled in.

use crate::codec::{CodecAdapter, Decoded};
use crate::error::{Error, Phase, Result, fail};
use crate::image::{ImageBuffer, PixelFormat};
use crate::task::{Codec, TaskInput};

/// Adapter that always fails with "requires backend ...".
///
/// Its quality space is still reported so task matrices can be planned for
/// any codec.
#[derive(Debug, Clone, Copy)]
pub struct UnavailableCodec {
    codec: Codec,
}

impl UnavailableCodec {
    pub fn new(codec: Codec) -> Self {
        Self { codec }
    }

    fn error(&self, phase: Phase, quiet: bool) -> Error {
        fail(
            quiet,
            Error::Unavailable {
                codec: self.codec.name(),
                backend: self.codec.backend(),
                phase,
            },
        )
    }
}

impl CodecAdapter for UnavailableCodec {
    fn codec(&self) -> Codec {
        self.codec
    }

    fn version(&self) -> String {
        "n/a".to_string()
    }

    fn is_available(&self) -> bool {
        false
    }

    fn supported_formats(&self) -> &'static [PixelFormat] {
        &[]
    }

    fn encode(&self, _task: &TaskInput, _image: &ImageBuffer, quiet: bool) -> Result<Vec<u8>> {
        Err(self.error(Phase::Encoding, quiet))
    }

    fn decode(&self, _task: &TaskInput, _encoded: &[u8], quiet: bool) -> Result<Decoded> {
        Err(self.error(Phase::Decoding, quiet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::capture;
    use crate::task::{CodecSettings, Quality};

    #[test]
    fn test_stub_always_fails() {
        let stub = UnavailableCodec::new(Codec::WebP);
        let task = TaskInput::new("a.png", CodecSettings::new(Codec::WebP, Quality::Lossy(50), 4));
        let image = ImageBuffer::new(1, 1, PixelFormat::Rgb8).unwrap();

        let (result, lines) = capture::diagnostics(|| stub.encode(&task, &image, false));
        assert_eq!(
            result.unwrap_err().to_string(),
            "encoding images requires backend webp (webp)"
        );
        assert_eq!(lines.len(), 1);
        assert!(stub.decode(&task, &[], true).is_err());
        assert_eq!(stub.version(), "n/a");
        assert!(!stub.lossy_qualities().is_empty());
    }
}
