//! Pages the worker can see and control.

use hashbrown::HashMap;
use url::Url;

use crate::ServiceWorkerError;

/// A client (page or worker context).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Whether this worker controls it.
    pub controlled: bool,
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

impl Client {
    pub fn window(id: impl Into<String>, url: Url) -> Self {
        Self {
            id: id.into(),
            url,
            client_type: ClientType::Window,
            focused: false,
            controlled: false,
        }
    }

    /// Focus the client. Only windows can take focus.
    pub fn focus(&mut self) -> Result<(), ServiceWorkerError> {
        if self.client_type != ClientType::Window {
            return Err(ServiceWorkerError::StateError(
                "Can only focus window clients".to_string(),
            ));
        }
        self.focused = true;
        Ok(())
    }
}

/// Options for [`Clients::match_all`].
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
    next_id: u64,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Matching clients, ordered by ID.
    pub fn match_all(&self, options: &ClientMatchOptions) -> Vec<&Client> {
        let mut matched: Vec<&Client> = self
            .clients
            .values()
            .filter(|c| options.include_uncontrolled || c.controlled)
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched
    }

    /// First window showing exactly `url`, controlled or not.
    pub fn find_window(&self, url: &Url) -> Option<&Client> {
        let options = ClientMatchOptions {
            include_uncontrolled: true,
            client_type: ClientType::Window,
        };
        self.match_all(&options)
            .into_iter()
            .find(|c| &c.url == url)
    }

    /// Open a new focused window. The worker controls it from the start.
    pub fn open_window(&mut self, url: Url) -> Client {
        self.next_id += 1;
        let mut client = Client::window(format!("client-{}", self.next_id), url);
        client.controlled = true;

        self.blur_all();
        client.focused = true;
        self.clients.insert(client.id.clone(), client.clone());
        client
    }

    /// Focus one client and blur the rest.
    pub fn focus(&mut self, id: &str) -> Result<Client, ServiceWorkerError> {
        let client_type = self
            .clients
            .get(id)
            .map(|c| c.client_type)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("client {id}")))?;
        if client_type != ClientType::Window {
            return Err(ServiceWorkerError::StateError(
                "Can only focus window clients".to_string(),
            ));
        }

        self.blur_all();
        let client = self
            .clients
            .get_mut(id)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("client {id}")))?;
        client.focus()?;
        Ok(client.clone())
    }

    /// Take control of every client. Returns how many were newly claimed.
    pub fn claim(&mut self) -> usize {
        let mut claimed = 0;
        for client in self.clients.values_mut() {
            if !client.controlled {
                client.controlled = true;
                claimed += 1;
            }
        }
        claimed
    }

    fn blur_all(&mut self) {
        for client in self.clients.values_mut() {
            client.focused = false;
        }
    }
}
