//! # Channel Descriptor Directory
//!
//! One scan of the DMA subsystem at session open. The result is immutable
//! and shared read-only by every channel, so it needs no locking.

use std::collections::BTreeMap;
use std::sync::Arc;

use iqdma_core::{Direction, DirectionCaps, Error, Result, MAX_CHANNELS, WORD_BYTES};
use iqdma_hal::{DmaSubsystem, Endpoint, EndpointCaps, EndpointId};

// =============================================================================
// CHANNEL DESCRIPTOR
// =============================================================================

/// Capabilities of one usable endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDescriptor {
    /// Hardware identity tag
    pub endpoint: EndpointId,
    /// Controller the endpoint belongs to
    pub controller: u32,
    /// Directions served
    pub directions: DirectionCaps,
    /// Transfer granularity in bytes
    pub alignment: usize,
    /// Largest transfer in bytes
    pub max_transfer: usize,
    /// Largest single submission in bytes
    pub max_burst: usize,
    /// Part of a high-throughput transform engine
    pub transform_engine: bool,
    /// Device name
    pub device_name: String,
    /// Driver name
    pub driver_name: String,
}

impl ChannelDescriptor {
    fn from_endpoint(ep: &Endpoint) -> Self {
        Self {
            endpoint: ep.id,
            controller: ep.controller,
            directions: ep.caps.directions(),
            alignment: ep.alignment.max(1),
            max_transfer: ep.max_transfer,
            max_burst: ep.max_burst,
            transform_engine: ep.caps.contains(EndpointCaps::TRANSFORM_ENGINE),
            device_name: ep.device_name.clone(),
            driver_name: ep.driver_name.clone(),
        }
    }

    /// Granularity expressed in sample words (at least one)
    pub fn granularity_words(&self) -> usize {
        (self.alignment / WORD_BYTES).max(1)
    }

    /// Check if `direction` can be bound
    pub fn supports(&self, direction: Direction) -> bool {
        self.directions.supports(direction)
    }
}

// =============================================================================
// DIRECTORY
// =============================================================================

/// Ordered list of usable channels, indexed by slot
#[derive(Debug, Clone)]
pub struct Directory {
    channels: Vec<Arc<ChannelDescriptor>>,
    peers: Vec<Option<usize>>,
}

impl Directory {
    /// Query the DMA subsystem once and keep the usable endpoints
    ///
    /// Endpoints must be private and slave-capable and serve at least one
    /// direction. Zero survivors is a configuration error.
    pub fn scan(dma: &dyn DmaSubsystem) -> Result<Self> {
        let mut channels: Vec<Arc<ChannelDescriptor>> = dma
            .enumerate()
            .iter()
            .filter(|ep| ep.caps.is_usable() && !ep.caps.directions().is_empty())
            .map(|ep| Arc::new(ChannelDescriptor::from_endpoint(ep)))
            .collect();

        if channels.is_empty() {
            log::warn!("Directory: no usable DMA endpoints");
            return Err(Error::Config);
        }
        if channels.len() > MAX_CHANNELS {
            log::warn!(
                "Directory: {} endpoints found, keeping the first {}",
                channels.len(),
                MAX_CHANNELS
            );
            channels.truncate(MAX_CHANNELS);
        }

        let peers = Self::pair(&channels);
        for (slot, desc) in channels.iter().enumerate() {
            log::debug!(
                "Directory: slot {} = {} ({}/{}) dirs={:?} align={} burst={}{}",
                slot,
                desc.endpoint,
                desc.device_name,
                desc.driver_name,
                desc.directions,
                desc.alignment,
                desc.max_burst,
                if desc.transform_engine { " transform" } else { "" },
            );
        }

        Ok(Self { channels, peers })
    }

    /// Full-duplex peers: one send-only and one receive-only endpoint
    /// alone on the same controller
    fn pair(channels: &[Arc<ChannelDescriptor>]) -> Vec<Option<usize>> {
        let mut by_controller: BTreeMap<u32, (Vec<usize>, Vec<usize>)> = BTreeMap::new();
        for (slot, desc) in channels.iter().enumerate() {
            let entry = by_controller.entry(desc.controller).or_default();
            match desc.directions.single() {
                Some(Direction::Send) => entry.0.push(slot),
                Some(Direction::Receive) => entry.1.push(slot),
                None => {},
            }
        }

        let mut peers = vec![None; channels.len()];
        for (send, receive) in by_controller.values() {
            if let ([tx], [rx]) = (send.as_slice(), receive.as_slice()) {
                peers[*tx] = Some(*rx);
                peers[*rx] = Some(*tx);
            }
        }
        peers
    }

    /// Number of channels
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Check if the directory is empty (never true after a successful scan)
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Descriptor in `slot`
    pub fn get(&self, slot: usize) -> Option<&Arc<ChannelDescriptor>> {
        self.channels.get(slot)
    }

    /// Slot of the endpoint named `device_name`
    pub fn find(&self, device_name: &str) -> Option<usize> {
        self.channels
            .iter()
            .position(|d| d.device_name == device_name)
    }

    /// Full-duplex peer of `slot`
    pub fn peer_of(&self, slot: usize) -> Option<usize> {
        self.peers.get(slot).copied().flatten()
    }

    /// Check if any endpoint belongs to a transform engine
    pub fn has_transform_engine(&self) -> bool {
        self.channels.iter().any(|d| d.transform_engine)
    }

    /// Iterate descriptors in slot order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ChannelDescriptor>> {
        self.channels.iter()
    }
}
