//! The source manager: builds and tears down the per-voice DSP chain
//! (data source, filters, reverb-send split, spatializer routing) and owns
//! the spatializer instance.

use std::sync::Arc;

use audio_dsp::{Biquad, PannerNode, Spatializer};
use tracing::debug;

use crate::config::SoundConfig;
use crate::mixer::{MixerCommand, MixerCtl, VoiceChain, VoiceRt};
use crate::resources::ResourceManager;
use crate::{EngineError, SourceId};

pub struct SourceManager {
    spatializer: Spatializer,
    device_rate: u32,
    max_block_frames: usize,
}

impl SourceManager {
    pub fn new(device_rate: u32, max_block_frames: usize) -> Self {
        Self {
            spatializer: Spatializer::new(),
            device_rate,
            max_block_frames,
        }
    }

    pub fn spatializer(&self) -> &Spatializer {
        &self.spatializer
    }

    pub fn spatializer_mut(&mut self) -> &mut Spatializer {
        &mut self.spatializer
    }

    /// Build the full render chain for `slot` and install it in the mixer.
    ///
    /// Chain order mirrors the routing of the engine graph: data source,
    /// low-pass, high-pass, fade, then a split into the dry path (unity)
    /// and the reverb send (at the config's send level), with the
    /// spatializer inserted on the dry path when enabled.
    pub fn initialize_source(
        &mut self,
        slot: SourceId,
        config: &Arc<SoundConfig>,
        resources: &mut ResourceManager,
        ctl: &mut MixerCtl,
    ) -> Result<Arc<VoiceRt>, EngineError> {
        let init = resources.create_voice_source(slot, config.data_source_asset, config.looping)?;

        let channels = (init.channels.max(1) as usize).min(audio_dsp::MAX_CHANNELS);
        let rt = Arc::new(VoiceRt::new(
            init.total_frames,
            config.lp_filter_value,
            config.hp_filter_value,
            config.master_reverb_send,
        ));

        let mut low_pass = Biquad::low_pass(self.device_rate, channels);
        low_pass.set_cutoff_value(config.lp_filter_value);
        let mut high_pass = Biquad::high_pass(self.device_rate, channels);
        high_pass.set_cutoff_value(config.hp_filter_value);

        let panner = if config.spatialization_enabled {
            let cell = self.spatializer.init_source(
                slot as u32,
                channels,
                Arc::new(config.spatialization.clone()),
            );
            Some(PannerNode::new(cell, channels, self.max_block_frames))
        } else {
            None
        };

        let chain = VoiceChain::new(
            slot,
            init.source,
            channels,
            init.sample_rate,
            config.looping,
            config.volume_multiplier,
            config.pitch_multiplier,
            low_pass,
            high_pass,
            panner,
            rt.clone(),
        );
        ctl.post(MixerCommand::Install(Box::new(chain)));

        debug!(
            target: "audio::sources",
            slot,
            asset = format_args!("{:#x}", config.data_source_asset),
            spatialized = config.spatialization_enabled,
            "source initialized"
        );
        Ok(rt)
    }

    /// Tear the chain down in reverse: spatializer first, then the mixer
    /// slot, then any streaming pump.
    pub fn release_source(
        &mut self,
        slot: SourceId,
        resources: &mut ResourceManager,
        ctl: &mut MixerCtl,
    ) {
        self.spatializer.release_source(slot as u32);
        ctl.post(MixerCommand::Remove { slot });
        resources.release_voice_source(slot);
    }

}
