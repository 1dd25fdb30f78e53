use anyhow::{anyhow, Result};

use crate::{AudioEncoder, EncoderFactory, EncoderOptions};

pub const WAV_MIME_TYPE: &str = "audio/wav";

const BITS_PER_SAMPLE: u16 = 16;
const CHANNELS: u16 = 1;

/// 16-bit mono PCM in a RIFF container. The header needs the final data
/// length, so every byte is emitted from [`AudioEncoder::finish`].
pub struct WavEncoder {
    sample_rate: u32,
    pcm: Vec<u8>,
    finished: bool,
}

impl WavEncoder {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            pcm: Vec::new(),
            finished: false,
        }
    }

    fn header(&self) -> Result<Vec<u8>> {
        let (riff_len, data_len) = chunk_sizes(self.pcm.len())?;
        let block_align = CHANNELS * BITS_PER_SAMPLE / 8;
        let byte_rate = self
            .sample_rate
            .checked_mul(u32::from(block_align))
            .ok_or_else(|| anyhow!("sample rate {} too high for wav", self.sample_rate))?;

        let mut header = Vec::with_capacity(44);
        header.extend_from_slice(b"RIFF");
        header.extend_from_slice(&riff_len.to_le_bytes());
        header.extend_from_slice(b"WAVE");
        header.extend_from_slice(b"fmt ");
        header.extend_from_slice(&16u32.to_le_bytes());
        header.extend_from_slice(&1u16.to_le_bytes());
        header.extend_from_slice(&CHANNELS.to_le_bytes());
        header.extend_from_slice(&self.sample_rate.to_le_bytes());
        header.extend_from_slice(&byte_rate.to_le_bytes());
        header.extend_from_slice(&block_align.to_le_bytes());
        header.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
        header.extend_from_slice(b"data");
        header.extend_from_slice(&data_len.to_le_bytes());
        Ok(header)
    }
}

/// RIFF and data chunk lengths for `pcm_len` bytes of samples. Both are
/// 32-bit fields, which caps a wav file just under 4 GiB.
fn chunk_sizes(pcm_len: usize) -> Result<(u32, u32)> {
    let data_len = u32::try_from(pcm_len)
        .map_err(|_| anyhow!("{pcm_len} bytes of pcm exceed the wav size limit"))?;
    let riff_len = data_len
        .checked_add(36)
        .ok_or_else(|| anyhow!("{pcm_len} bytes of pcm exceed the wav size limit"))?;
    Ok((riff_len, data_len))
}

impl AudioEncoder for WavEncoder {
    fn mime_type(&self) -> &str {
        WAV_MIME_TYPE
    }

    fn encode(&mut self, samples: &[f32]) -> Result<Vec<u8>> {
        if self.finished {
            return Err(anyhow!("wav encoder already finished"));
        }
        self.pcm.reserve(samples.len() * 2);
        for sample in samples {
            let clamped = sample.clamp(-1.0, 1.0);
            let value = (clamped * i16::MAX as f32) as i16;
            self.pcm.extend_from_slice(&value.to_le_bytes());
        }
        Ok(Vec::new())
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        if self.finished {
            return Err(anyhow!("wav encoder already finished"));
        }
        self.finished = true;
        let mut out = self.header()?;
        out.append(&mut self.pcm);
        Ok(out)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WavEncoderFactory;

impl EncoderFactory for WavEncoderFactory {
    fn is_supported(&self, mime_type: &str) -> bool {
        mime_type == WAV_MIME_TYPE
    }

    fn create(&self, options: &EncoderOptions) -> Result<Box<dyn AudioEncoder>> {
        if !self.is_supported(&options.mime_type) {
            return Err(anyhow!("unsupported mime type {}", options.mime_type));
        }
        Ok(Box::new(WavEncoder::new(options.sample_rate)))
    }
}
