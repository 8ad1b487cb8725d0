//! backups Abscissa Application
use std::process;

use abscissa_core::{
    application::{self, fatal_error, AppCell},
    config::{self, CfgCell},
    path::StandardPaths,
    terminal::component::Terminal,
    Application, Component, FrameworkError, Shutdown,
};

use crate::{commands::EntryPoint, config::BackupsConfig};

/// Application state
pub static BACKUPS_APP: AppCell<BackupsApp> = AppCell::new();

/// backups Application
#[derive(Debug, Default)]
pub struct BackupsApp {
    /// Application configuration.
    config: CfgCell<BackupsConfig>,

    /// Application state.
    state: application::State<Self>,
}

impl Application for BackupsApp {
    /// Entrypoint command for this application.
    type Cmd = EntryPoint;

    /// Application configuration.
    type Cfg = BackupsConfig;

    /// Paths to resources within the application.
    type Paths = StandardPaths;

    /// Accessor for application configuration.
    fn config(&self) -> config::Reader<BackupsConfig> {
        self.config.read()
    }

    /// Borrow the application state immutably.
    fn state(&self) -> &application::State<Self> {
        &self.state
    }

    /// Only the terminal component is used; logging is set up with `simplelog`
    /// while processing the config.
    fn framework_components(
        &mut self,
        command: &Self::Cmd,
    ) -> Result<Vec<Box<dyn Component<Self>>>, FrameworkError> {
        let terminal = Terminal::new(self.term_colors(command));
        Ok(vec![Box::new(terminal)])
    }

    /// Register all components used by this application.
    fn register_components(&mut self, command: &Self::Cmd) -> Result<(), FrameworkError> {
        let framework_components = self.framework_components(command)?;
        let mut app_components = self.state.components_mut();
        app_components.register(framework_components)
    }

    /// Post-configuration lifecycle callback.
    fn after_config(&mut self, config: Self::Cfg) -> Result<(), FrameworkError> {
        self.state.components_mut().after_config(&config)?;
        self.config.set_once(config);
        Ok(())
    }

    /// Shut down this application gracefully
    fn shutdown(&self, shutdown: Shutdown) -> ! {
        let exit_code = match shutdown {
            Shutdown::Crash => 1,
            _ => 0,
        };
        self.shutdown_with_exitcode(shutdown, exit_code)
    }

    /// Shut down this application gracefully, exiting with given exit code.
    ///
    /// Used to hand a failed duplicity exit code on to the caller.
    fn shutdown_with_exitcode(&self, shutdown: Shutdown, exit_code: i32) -> ! {
        let result = self.state().components().shutdown(self, shutdown);
        if let Err(e) = result {
            fatal_error(self, &e)
        }

        process::exit(exit_code);
    }
}
