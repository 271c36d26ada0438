use crate::post_rotate::{PostRotate, PostRotator};
use crate::template::PathTemplate;
use crate::writer::{ActiveFile, OutputFile};
use crate::Result;
use chrono::Local;
use crossbeam_channel::{Receiver, never, select};
use log::{error, info, warn};
use pcap_file::DataLink;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Capturing,
    Rotating,
    Draining,
    Terminated,
}

/// Owns the active capture file and reacts to rotation and shutdown events.
pub struct Controller {
    template: PathTemplate,
    datalink: DataLink,
    snaplen: u32,
    active: ActiveFile,
    post_rotator: Option<PostRotator>,
    state: ControlState,
    completed: Vec<PathBuf>,
}

impl Controller {
    /// Creates the first output file. Capturing may only start once this
    /// succeeds.
    pub fn new(
        template: PathTemplate,
        datalink: DataLink,
        snaplen: u32,
        post_rotate: Option<PostRotate>,
    ) -> Result<Self> {
        let first = OutputFile::create(&template, datalink, snaplen)?;
        info!("Writing packets to {}", first.path().display());

        Ok(Self {
            template,
            datalink,
            snaplen,
            active: ActiveFile::new(first),
            post_rotator: post_rotate.map(PostRotator::new),
            state: ControlState::Capturing,
            completed: Vec::new(),
        })
    }

    /// Handle for the capture loop to write through.
    pub fn active_file(&self) -> ActiveFile {
        self.active.clone()
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    /// Files finalized so far, oldest first.
    pub fn completed_files(&self) -> &[PathBuf] {
        &self.completed
    }

    /// Runs until `shutdown` fires (or its sender goes away), then drains.
    ///
    /// Only a failure to create the next file during rotation is returned;
    /// capture cannot go on without somewhere to write. The current file is
    /// drained before the error is handed back.
    pub fn run(&mut self, rotations: &Receiver<()>, shutdown: &Receiver<()>) -> Result<()> {
        let mut rotations = rotations.clone();
        loop {
            let mut trigger_gone = false;
            select! {
                recv(rotations) -> event => match event {
                    Ok(()) => {
                        if let Err(e) = self.rotate() {
                            error!("Rotation failed, closing current file: {}", e);
                            self.drain();
                            return Err(e);
                        }
                    }
                    Err(_) => trigger_gone = true,
                },
                recv(shutdown) -> _ => {
                    info!("Termination requested");
                    self.drain();
                    return Ok(());
                }
            }
            if trigger_gone {
                warn!("Rotation trigger stopped, no further rotations");
                rotations = never();
            }
        }
    }

    /// Swaps a freshly created file into the active slot, then finalizes the
    /// old one outside the lock.
    pub fn rotate(&mut self) -> Result<()> {
        self.state = ControlState::Rotating;

        let swapped = self.swap_in_next();
        self.state = ControlState::Capturing;

        if let Some(old) = swapped? {
            self.retire(old);
        }
        Ok(())
    }

    /// Creates the next file and puts it in the slot, all under the lock.
    /// Returns the file it replaced, if any.
    fn swap_in_next(&self) -> Result<Option<OutputFile>> {
        let mut slot = self.active.lock();
        let path = self.template.render(&Local::now())?;
        if slot.as_ref().is_some_and(|file| file.path() == path.as_path()) {
            warn!(
                "Rotation would reopen {}, keeping current file",
                path.display()
            );
            return Ok(None);
        }

        let next = OutputFile::create_at(path, self.datalink, self.snaplen)?;
        info!("Rotated to {}", next.path().display());
        Ok(slot.replace(next))
    }

    /// Closes the active file without a successor and waits for every
    /// post-rotation task.
    pub fn drain(&mut self) {
        self.state = ControlState::Draining;

        let last = self.active.lock().take();
        if let Some(last) = last {
            self.retire(last);
        }

        if let Some(rotator) = self.post_rotator.as_mut() {
            let outstanding = rotator.outstanding();
            if outstanding > 0 {
                info!("Waiting for {} postrotate task(s)", outstanding);
            }
            rotator.wait_all();
        }

        self.state = ControlState::Terminated;
    }

    fn retire(&mut self, file: OutputFile) {
        let path = file.path().to_path_buf();
        let packets = file.packets();
        match file.finalize() {
            Ok(()) => info!("Closed {} ({} packets)", path.display(), packets),
            Err(e) => error!("Failed to close {}: {}", path.display(), e),
        }

        if let Some(rotator) = self.post_rotator.as_mut() {
            rotator.dispatch(path.clone());
        }
        self.completed.push(path);
    }
}
